//! Error types for the market ledger
//!
//! Every failure aborts the whole call. Variants carry the ids, addresses and
//! supplied values a caller needs to decide whether to retry or abandon.

use serde::Serialize;
use thiserror::Error;

use crate::types::{Address, MarketId, MarketStatus, OrderId, OrderType, Outcome};

/// Result type alias for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Broad failure class, used by callers (and the HTTP layer) to react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Authorization,
    Validation,
    State,
    Economic,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // ===== AUTHORIZATION =====
    #[error("{caller} is not the owner")]
    NotOwner { caller: Address },

    #[error("{caller} is not the creation agent")]
    NotCreationAgent { caller: Address },

    #[error("{caller} is not the resolution agent")]
    NotResolutionAgent { caller: Address },

    #[error("{caller} is not the approval authority")]
    NotApprovalAuthority { caller: Address },

    #[error("trader {trader} is not approved")]
    TraderNotApproved { trader: Address },

    #[error("{caller} does not own {order_id}")]
    NotOrderOwner { order_id: OrderId, caller: Address },

    // ===== VALIDATION =====
    #[error("{field} must not be the zero address")]
    ZeroAddress { field: &'static str },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("price {price} outside (0, 1000000)")]
    InvalidPrice { price: u128 },

    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("fee {fee_bps} bps exceeds 10000")]
    FeeTooHigh { fee_bps: u32 },

    #[error("open epoch {open_epoch} is after close epoch {close_epoch}")]
    InvalidEpochRange { open_epoch: u64, close_epoch: u64 },

    #[error("expiration {expiration_epoch} is in the past (now {now})")]
    InvalidExpiration { expiration_epoch: u64, now: u64 },

    #[error("{order_id} expired at {expiration_epoch}")]
    OrderExpired { order_id: OrderId, expiration_epoch: u64 },

    #[error("order type {order_type} is not supported")]
    UnsupportedOrderType { order_type: OrderType },

    #[error("position must be yes or no, got {position}")]
    InvalidPosition { position: Outcome },

    #[error("resolution timestamp {resolved_at} precedes close epoch {close_epoch}")]
    InvalidResolutionTime { resolved_at: u64, close_epoch: u64 },

    // ===== STATE =====
    #[error("{market_id} not found")]
    MarketNotFound { market_id: MarketId },

    #[error("{order_id} not found")]
    OrderNotFound { order_id: OrderId },

    #[error("{market_id} is {status}, expected {expected}")]
    UnexpectedStatus {
        market_id: MarketId,
        status: MarketStatus,
        expected: &'static str,
    },

    #[error("{market_id} trading window [{open_epoch}, {close_epoch}] does not contain {now}")]
    OutsideTradingWindow {
        market_id: MarketId,
        now: u64,
        open_epoch: u64,
        close_epoch: u64,
    },

    #[error("{order_id} is not active")]
    OrderNotActive { order_id: OrderId },

    #[error("{market_id} cannot resolve before close epoch {close_epoch} (now {now})")]
    MarketNotClosed { market_id: MarketId, now: u64, close_epoch: u64 },

    #[error("{market_id} dispute window open until {finalizable_at} (now {now})")]
    DisputeWindowOpen { market_id: MarketId, now: u64, finalizable_at: u64 },

    #[error("{market_id} already has an active dispute")]
    DisputeAlreadyActive { market_id: MarketId },

    #[error("{market_id} has no resolved outcome")]
    MarketUnresolved { market_id: MarketId },

    #[error("a mutating call is already in progress")]
    ReentrantCall,

    // ===== ECONOMIC =====
    #[error("{order_id} has {remaining} remaining, fill requested {requested}")]
    Overfill { order_id: OrderId, requested: u128, remaining: u128 },

    #[error("{order_id} price {order_price} outside taker limit {limit_price}")]
    SlippageExceeded { order_id: OrderId, order_price: u128, limit_price: u128 },

    #[error("escrow holds {available}, needs {required}")]
    InsufficientEscrow { required: u128, available: u128 },

    #[error("transfer of {amount} from {from} to {to} failed: {reason}")]
    TransferFailed { from: Address, to: Address, amount: u128, reason: String },

    #[error("{trader} already claimed from {market_id}")]
    AlreadyClaimed { market_id: MarketId, trader: Address },

    #[error("{trader} holds no {outcome} shares in {market_id}")]
    NothingToClaim { market_id: MarketId, trader: Address, outcome: Outcome },

    #[error("{market_id} finalized as {outcome}, claim requested {position}")]
    NotWinningPosition { market_id: MarketId, position: Outcome, outcome: Outcome },

    #[error("arithmetic overflow computing {what}")]
    Overflow { what: &'static str },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        use LedgerError::*;
        match self {
            NotOwner { .. }
            | NotCreationAgent { .. }
            | NotResolutionAgent { .. }
            | NotApprovalAuthority { .. }
            | TraderNotApproved { .. }
            | NotOrderOwner { .. } => ErrorKind::Authorization,

            ZeroAddress { .. }
            | EmptyField { .. }
            | InvalidPrice { .. }
            | InvalidQuantity
            | FeeTooHigh { .. }
            | InvalidEpochRange { .. }
            | InvalidExpiration { .. }
            | OrderExpired { .. }
            | UnsupportedOrderType { .. }
            | InvalidPosition { .. }
            | InvalidResolutionTime { .. } => ErrorKind::Validation,

            MarketNotFound { .. }
            | OrderNotFound { .. }
            | UnexpectedStatus { .. }
            | OutsideTradingWindow { .. }
            | OrderNotActive { .. }
            | MarketNotClosed { .. }
            | DisputeWindowOpen { .. }
            | DisputeAlreadyActive { .. }
            | MarketUnresolved { .. }
            | ReentrantCall => ErrorKind::State,

            Overfill { .. }
            | SlippageExceeded { .. }
            | InsufficientEscrow { .. }
            | TransferFailed { .. }
            | AlreadyClaimed { .. }
            | NothingToClaim { .. }
            | NotWinningPosition { .. }
            | Overflow { .. } => ErrorKind::Economic,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::MarketNotFound { .. } | LedgerError::OrderNotFound { .. })
    }
}

// ============================================================================
// TESTS
// ============================================================================
