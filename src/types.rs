// ============================================================================
// Core Types - Collateral Market Ledger
// ============================================================================
//
// Shared identifiers, enums and fixed-point constants.
//
// Price Convention:
//   - Prices are fixed-point with scale 1,000,000 (PRICE_SCALE)
//   - Valid prices lie in the open interval (0, 1,000,000)
//   - A YES price of 650_000 means 0.65 collateral units per share
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Fixed-point scale for prices (1.0 == 1_000_000)
pub const PRICE_SCALE: u128 = 1_000_000;

/// Maximum fee in basis points (100%)
pub const MAX_FEE_BPS: u32 = 10_000;

// ============================================================================
// ADDRESS
// ============================================================================

/// Account address (trader, agent, token or escrow)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Address(value.into())
    }

    /// The zero address: empty, or hex with only zero digits
    pub fn zero() -> Self {
        Address("0x0000000000000000000000000000000000000000".to_string())
    }

    pub fn is_zero(&self) -> bool {
        let digits = self.0.strip_prefix("0x").unwrap_or(&self.0);
        digits.chars().all(|c| c == '0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

// ============================================================================
// ENTITY IDS
// ============================================================================

/// Market identifier, assigned sequentially from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub u64);

/// Order identifier, assigned sequentially from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market#{}", self.0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order#{}", self.0)
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Binary outcome. Doubles as the position side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Undefined,
    Yes,
    No,
}

impl Outcome {
    /// The other side of a binary position. `Undefined` has no opposite.
    pub fn opposite(&self) -> Option<Self> {
        match self {
            Outcome::Yes => Some(Outcome::No),
            Outcome::No => Some(Outcome::Yes),
            Outcome::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Outcome::Undefined)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Undefined => "undefined",
            Outcome::Yes => "yes",
            Outcome::No => "no",
        };
        f.write_str(s)
    }
}

/// Market lifecycle status
///
/// Flow: Active → Resolved → (Disputed) → Finalized
///
/// `Draft`, `Paused` and `Cancelled` are representable but no operation
/// produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Draft,
    Active,
    Paused,
    Resolved,
    Disputed,
    Finalized,
    Cancelled,
}

impl MarketStatus {
    pub fn is_trading_open(&self) -> bool {
        matches!(self, MarketStatus::Active)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketStatus::Draft => "draft",
            MarketStatus::Active => "active",
            MarketStatus::Paused => "paused",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Disputed => "disputed",
            MarketStatus::Finalized => "finalized",
            MarketStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Order type - execution behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Good Till Cancelled - rests until filled or cancelled
    #[default]
    GTC,
    /// Immediate Or Cancel
    IOC,
    /// Fill Or Kill
    FOK,
}

impl OrderType {
    /// Only resting GTC orders are accepted by the ledger
    pub fn is_supported(&self) -> bool {
        matches!(self, OrderType::GTC)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::GTC => "GTC",
            OrderType::IOC => "IOC",
            OrderType::FOK => "FOK",
        };
        f.write_str(s)
    }
}

// ============================================================================
// TESTS
// ============================================================================
