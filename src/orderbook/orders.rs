// ============================================================================
// Order Types - Collateral Market Ledger
// ============================================================================
//
// Resting limit orders backed by escrowed collateral.
//
// Price Convention:
//   - Prices are fixed-point, scale 1,000,000, open interval (0, 1,000,000)
//   - The maker's price is the settlement price of every fill
//   - A taker's limit price is expressed from the taker's side: a YES maker
//     fills only when order.price >= limit, a NO maker when order.price <= limit
//
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Address, MarketId, OrderId, OrderType, Outcome, PRICE_SCALE};

/// Reject prices outside the open interval (0, SCALE)
pub fn validate_price(price: u128) -> LedgerResult<()> {
    if price == 0 || price >= PRICE_SCALE {
        return Err(LedgerError::InvalidPrice { price });
    }
    Ok(())
}

// ============================================================================
// ORDER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market_id: MarketId,

    /// Signer who escrowed the stake; holds cancellation rights
    pub owner: Address,

    /// Receives the position shares produced by fills
    pub beneficiary: Address,

    pub position: Outcome,

    /// Fixed-point price (scale 1,000,000)
    pub price: u128,

    pub quantity: u128,

    /// Never decreases, never exceeds `quantity`
    pub filled: u128,

    pub order_type: OrderType,

    /// 0 = never expires
    pub expiration_epoch: u64,

    pub active: bool,

    pub created_at: u64,
}

impl Order {
    pub fn remaining(&self) -> u128 {
        self.quantity - self.filled
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_epoch != 0 && now > self.expiration_epoch
    }

    pub fn require_active(&self) -> LedgerResult<()> {
        if !self.active {
            return Err(LedgerError::OrderNotActive { order_id: self.id });
        }
        Ok(())
    }

    pub fn require_unexpired(&self, now: u64) -> LedgerResult<()> {
        if self.is_expired(now) {
            return Err(LedgerError::OrderExpired {
                order_id: self.id,
                expiration_epoch: self.expiration_epoch,
            });
        }
        Ok(())
    }

    /// Check a taker's terms against this resting order
    pub fn check_fill(&self, limit_price: u128, quantity: u128) -> LedgerResult<()> {
        validate_price(limit_price)?;
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        let remaining = self.remaining();
        if quantity > remaining {
            return Err(LedgerError::Overfill {
                order_id: self.id,
                requested: quantity,
                remaining,
            });
        }
        let within_limit = match self.position {
            Outcome::Yes => self.price >= limit_price,
            Outcome::No => self.price <= limit_price,
            Outcome::Undefined => false,
        };
        if !within_limit {
            return Err(LedgerError::SlippageExceeded {
                order_id: self.id,
                order_price: self.price,
                limit_price,
            });
        }
        Ok(())
    }

    /// Record a fill; the order goes inactive exactly when fully filled
    pub fn apply_fill(&mut self, quantity: u128) {
        self.filled += quantity;
        if self.filled == self.quantity {
            self.active = false;
        }
    }

    /// Deactivate and return the unfilled quantity
    pub fn cancel(&mut self) -> u128 {
        self.active = false;
        self.remaining()
    }
}

// ============================================================================
// REQUESTS / RESULTS
// ============================================================================

/// Parameters of a new resting order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: MarketId,
    pub position: Outcome,
    pub price: u128,
    pub quantity: u128,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub expiration_epoch: u64,
    /// Defaults to the submitter
    #[serde(default)]
    pub recipient: Option<Address>,
}

impl OrderRequest {
    pub fn new(market_id: MarketId, position: Outcome, price: u128, quantity: u128) -> Self {
        Self {
            market_id,
            position,
            price,
            quantity,
            order_type: OrderType::GTC,
            expiration_epoch: 0,
            recipient: None,
        }
    }

    pub fn with_expiration(mut self, expiration_epoch: u64) -> Self {
        self.expiration_epoch = expiration_epoch;
        self
    }

    pub fn with_recipient(mut self, recipient: Address) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    /// Order-level checks that do not depend on market state
    pub fn validate(&self, now: u64) -> LedgerResult<()> {
        if !self.position.is_defined() {
            return Err(LedgerError::InvalidPosition { position: self.position });
        }
        validate_price(self.price)?;
        if self.quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        if !self.order_type.is_supported() {
            return Err(LedgerError::UnsupportedOrderType { order_type: self.order_type });
        }
        if self.expiration_epoch != 0 && self.expiration_epoch < now {
            return Err(LedgerError::InvalidExpiration {
                expiration_epoch: self.expiration_epoch,
                now,
            });
        }
        Ok(())
    }
}

/// A taker's fill of one resting order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRequest {
    /// Worst acceptable maker price, from the taker's side
    pub limit_price: u128,
    pub quantity: u128,
    /// Receives the taker's shares; defaults to the filler
    #[serde(default)]
    pub recipient: Option<Address>,
}

impl FillRequest {
    pub fn new(limit_price: u128, quantity: u128) -> Self {
        Self {
            limit_price,
            quantity,
            recipient: None,
        }
    }

    pub fn with_recipient(mut self, recipient: Address) -> Self {
        self.recipient = Some(recipient);
        self
    }
}

/// Returned by a fill: the taker's escrowed cost and the informational fee.
/// The fee is charged at claim time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReceipt {
    pub cost: u128,
    pub fee: u128,
}

// ============================================================================
// TESTS
// ============================================================================
