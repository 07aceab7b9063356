// ============================================================================
// Shares Module - Collateral Market Ledger
// ============================================================================
//
// Per-market, per-trader outcome share balances accrued from fills, and the
// claim registry that stops a trader from being paid twice.
//
// Share Types:
//   - YES shares: pay 1 collateral unit if the market finalizes YES
//   - NO shares:  pay 1 collateral unit if the market finalizes NO
//
// Every fill credits the maker's beneficiary and the taker's recipient the
// same quantity on opposite sides. Balances only grow, except for the one
// full withdrawal a claim performs.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Address, MarketId, Outcome};

// ============================================================================
// SHARE BALANCE
// ============================================================================

/// A trader's holdings in one market
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareBalance {
    pub yes: u128,
    pub no: u128,
}

impl ShareBalance {
    pub fn get(&self, outcome: Outcome) -> u128 {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
            Outcome::Undefined => 0,
        }
    }

    fn slot(&mut self, outcome: Outcome) -> LedgerResult<&mut u128> {
        match outcome {
            Outcome::Yes => Ok(&mut self.yes),
            Outcome::No => Ok(&mut self.no),
            Outcome::Undefined => Err(LedgerError::InvalidPosition { position: outcome }),
        }
    }
}

// ============================================================================
// POSITION LEDGER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLedger {
    /// market -> trader -> balance
    pub positions: BTreeMap<MarketId, BTreeMap<Address, ShareBalance>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(
        &mut self,
        market_id: MarketId,
        trader: &Address,
        outcome: Outcome,
        quantity: u128,
    ) -> LedgerResult<()> {
        let balance = self
            .positions
            .entry(market_id)
            .or_default()
            .entry(trader.clone())
            .or_default();
        let slot = balance.slot(outcome)?;
        *slot = slot
            .checked_add(quantity)
            .ok_or(LedgerError::Overflow { what: "share balance" })?;
        Ok(())
    }

    pub fn balance_of(&self, market_id: MarketId, trader: &Address) -> ShareBalance {
        self.positions
            .get(&market_id)
            .and_then(|holders| holders.get(trader))
            .copied()
            .unwrap_or_default()
    }

    pub fn shares(&self, market_id: MarketId, trader: &Address, outcome: Outcome) -> u128 {
        self.balance_of(market_id, trader).get(outcome)
    }

    /// Zero the balance and return what it held
    pub fn withdraw_all(
        &mut self,
        market_id: MarketId,
        trader: &Address,
        outcome: Outcome,
    ) -> LedgerResult<u128> {
        let Some(balance) = self
            .positions
            .get_mut(&market_id)
            .and_then(|holders| holders.get_mut(trader))
        else {
            return Ok(0);
        };
        let slot = balance.slot(outcome)?;
        Ok(std::mem::take(slot))
    }
}

// ============================================================================
// CLAIM REGISTRY
// ============================================================================

/// One claim per (market, trader), never reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRegistry {
    pub claims: BTreeMap<MarketId, BTreeSet<Address>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_claimed(&self, market_id: MarketId, trader: &Address) -> bool {
        self.claims
            .get(&market_id)
            .is_some_and(|traders| traders.contains(trader))
    }

    pub fn require_unclaimed(&self, market_id: MarketId, trader: &Address) -> LedgerResult<()> {
        if self.has_claimed(market_id, trader) {
            return Err(LedgerError::AlreadyClaimed { market_id, trader: trader.clone() });
        }
        Ok(())
    }

    pub fn record(&mut self, market_id: MarketId, trader: &Address) {
        self.claims.entry(market_id).or_default().insert(trader.clone());
    }
}

// ============================================================================
// TESTS
// ============================================================================
