// ============================================================================
// Market Lifecycle - Collateral Market Ledger
// ============================================================================
//
// State machine:
//
//   create ──► Active ──resolve──► Resolved ──dispute──► Disputed
//                                     │                     │
//                                     └──────finalize───────┴──► Finalized
//
//   - resolve:  resolution agent, once now >= close_epoch
//   - dispute:  anyone, while exactly Resolved with no active dispute
//   - finalize: owner, once now >= resolved_at + dispute window
//
// Orders may only be submitted or filled while Active and
// open_epoch <= now <= close_epoch. Later transitions ignore that window.
//
// ============================================================================

pub mod dispute;

pub use dispute::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Address, MarketId, MarketStatus, Outcome, MAX_FEE_BPS};

pub(crate) fn non_empty(value: &str, field: &'static str) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::EmptyField { field });
    }
    Ok(())
}

// ============================================================================
// MARKET
// ============================================================================

/// Creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    pub question_uri: String,
    pub oracle_uri: String,
    pub open_epoch: u64,
    pub close_epoch: u64,
    pub fee_bps: u32,
}

impl MarketParams {
    pub fn validate(&self) -> LedgerResult<()> {
        non_empty(&self.question_uri, "questionURI")?;
        non_empty(&self.oracle_uri, "oracleURI")?;
        if self.open_epoch > self.close_epoch {
            return Err(LedgerError::InvalidEpochRange {
                open_epoch: self.open_epoch,
                close_epoch: self.close_epoch,
            });
        }
        if self.fee_bps > MAX_FEE_BPS {
            return Err(LedgerError::FeeTooHigh { fee_bps: self.fee_bps });
        }
        Ok(())
    }
}

/// Resolution submitted by the resolution agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: Outcome,
    pub resolution_uri: String,
    pub evidence_uri: String,
    /// Defaults to the call time
    #[serde(default)]
    pub resolved_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub status: MarketStatus,

    /// Undefined until resolved, then Yes or No
    pub outcome: Outcome,

    /// Trading window (unix seconds, inclusive)
    pub open_epoch: u64,
    pub close_epoch: u64,

    pub resolved_at: Option<u64>,

    /// 0..=10000
    pub fee_bps: u32,

    pub dispute_active: bool,

    // Evidence anchors; opaque, checked only for non-emptiness
    pub question_uri: String,
    pub oracle_uri: String,
    pub resolution_uri: String,
    pub evidence_uri: String,

    pub creator: Address,
    pub resolver: Option<Address>,

    /// Cumulative filled quantity, never decreases
    pub total_collateral: u128,

    pub created_at: u64,
}

impl Market {
    fn new(id: MarketId, creator: Address, params: MarketParams, now: u64) -> Self {
        Self {
            id,
            status: MarketStatus::Active,
            outcome: Outcome::Undefined,
            open_epoch: params.open_epoch,
            close_epoch: params.close_epoch,
            resolved_at: None,
            fee_bps: params.fee_bps,
            dispute_active: false,
            question_uri: params.question_uri,
            oracle_uri: params.oracle_uri,
            resolution_uri: String::new(),
            evidence_uri: String::new(),
            creator,
            resolver: None,
            total_collateral: 0,
            created_at: now,
        }
    }

    fn unexpected(&self, expected: &'static str) -> LedgerError {
        LedgerError::UnexpectedStatus {
            market_id: self.id,
            status: self.status,
            expected,
        }
    }

    pub fn in_trading_window(&self, now: u64) -> bool {
        self.open_epoch <= now && now <= self.close_epoch
    }

    /// Gate for submitting and filling orders
    pub fn require_trading(&self, now: u64) -> LedgerResult<()> {
        if !self.status.is_trading_open() {
            return Err(self.unexpected("active"));
        }
        if !self.in_trading_window(now) {
            return Err(LedgerError::OutsideTradingWindow {
                market_id: self.id,
                now,
                open_epoch: self.open_epoch,
                close_epoch: self.close_epoch,
            });
        }
        Ok(())
    }

    pub fn record_fill(&mut self, quantity: u128) -> LedgerResult<()> {
        self.total_collateral = self
            .total_collateral
            .checked_add(quantity)
            .ok_or(LedgerError::Overflow { what: "market collateral" })?;
        Ok(())
    }

    // ===== RESOLUTION =====

    /// Active -> Resolved. Clears any dispute flag.
    pub fn resolve(&mut self, resolver: &Address, resolution: &Resolution, now: u64) -> LedgerResult<u64> {
        if self.status != MarketStatus::Active {
            return Err(self.unexpected("active"));
        }
        if now < self.close_epoch {
            return Err(LedgerError::MarketNotClosed {
                market_id: self.id,
                now,
                close_epoch: self.close_epoch,
            });
        }
        if !resolution.outcome.is_defined() {
            return Err(LedgerError::InvalidPosition { position: resolution.outcome });
        }
        non_empty(&resolution.resolution_uri, "resolutionURI")?;
        non_empty(&resolution.evidence_uri, "evidenceURI")?;

        let resolved_at = resolution.resolved_at.unwrap_or(now);
        if resolved_at < self.close_epoch {
            return Err(LedgerError::InvalidResolutionTime {
                resolved_at,
                close_epoch: self.close_epoch,
            });
        }

        self.status = MarketStatus::Resolved;
        self.outcome = resolution.outcome;
        self.resolved_at = Some(resolved_at);
        self.resolution_uri = resolution.resolution_uri.clone();
        self.evidence_uri = resolution.evidence_uri.clone();
        self.resolver = Some(resolver.clone());
        self.dispute_active = false;
        Ok(resolved_at)
    }

    /// Resolved -> Disputed
    pub fn open_dispute(&mut self, evidence_uri: &str) -> LedgerResult<()> {
        if self.dispute_active || self.status == MarketStatus::Disputed {
            return Err(LedgerError::DisputeAlreadyActive { market_id: self.id });
        }
        if self.status != MarketStatus::Resolved {
            return Err(self.unexpected("resolved"));
        }
        non_empty(evidence_uri, "evidenceURI")?;
        self.status = MarketStatus::Disputed;
        self.dispute_active = true;
        Ok(())
    }

    /// Earliest time finalization is allowed
    pub fn finalizable_at(&self, dispute_window: u64) -> Option<u64> {
        self.resolved_at.map(|t| t.saturating_add(dispute_window))
    }

    /// Resolved, undisputed and past the dispute window
    pub fn is_finalizable(&self, now: u64, dispute_window: u64) -> bool {
        self.status == MarketStatus::Resolved
            && !self.dispute_active
            && self.finalizable_at(dispute_window).is_some_and(|t| now >= t)
    }

    /// Resolved | Disputed -> Finalized
    pub fn finalize(&mut self, now: u64, dispute_window: u64) -> LedgerResult<()> {
        if !matches!(self.status, MarketStatus::Resolved | MarketStatus::Disputed) {
            return Err(self.unexpected("resolved or disputed"));
        }
        let finalizable_at = match self.finalizable_at(dispute_window) {
            Some(t) if self.outcome.is_defined() => t,
            _ => return Err(LedgerError::MarketUnresolved { market_id: self.id }),
        };
        if now < finalizable_at {
            return Err(LedgerError::DisputeWindowOpen {
                market_id: self.id,
                now,
                finalizable_at,
            });
        }
        self.status = MarketStatus::Finalized;
        self.dispute_active = false;
        Ok(())
    }

    /// Finalized outcome, or why there is none yet
    pub fn final_outcome(&self) -> LedgerResult<Outcome> {
        if self.status != MarketStatus::Finalized {
            return Err(self.unexpected("finalized"));
        }
        Ok(self.outcome)
    }
}

/// Market as returned to readers, with the derived finalization flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSnapshot {
    #[serde(flatten)]
    pub market: Market,
    pub finalizable: bool,
    pub finalizable_at: Option<u64>,
}

impl MarketSnapshot {
    pub fn of(market: &Market, now: u64, dispute_window: u64) -> Self {
        Self {
            market: market.clone(),
            finalizable: market.is_finalizable(now, dispute_window),
            finalizable_at: market.finalizable_at(dispute_window),
        }
    }
}

// ============================================================================
// MARKET BOOK
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBook {
    pub markets: BTreeMap<MarketId, Market>,
    /// Last assigned id
    pub last_id: u64,
}

impl MarketBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, creator: &Address, params: MarketParams, now: u64) -> LedgerResult<&Market> {
        params.validate()?;
        self.last_id += 1;
        let id = MarketId(self.last_id);
        let market = Market::new(id, creator.clone(), params, now);
        Ok(self.markets.entry(id).or_insert(market))
    }

    pub fn get(&self, market_id: MarketId) -> LedgerResult<&Market> {
        self.markets
            .get(&market_id)
            .ok_or(LedgerError::MarketNotFound { market_id })
    }

    pub fn get_mut(&mut self, market_id: MarketId) -> LedgerResult<&mut Market> {
        self.markets
            .get_mut(&market_id)
            .ok_or(LedgerError::MarketNotFound { market_id })
    }

    pub fn list(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
    }
}

// ============================================================================
// TESTS
// ============================================================================
