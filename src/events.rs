//! Ledger notifications for the external indexer.
//!
//! Every committed call publishes one or more `LedgerEvent`s to the
//! registered sinks. The ledger never depends on anyone consuming them.
//!
//! `EventLog` keeps an append-only, hash-chained window of records that an
//! indexer can poll with `since(seq)`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

use crate::types::{Address, MarketId, OrderId, OrderType, Outcome};

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    MarketCreated {
        market_id: MarketId,
        creator: Address,
        question_uri: String,
        oracle_uri: String,
        open_epoch: u64,
        close_epoch: u64,
        fee_bps: u32,
    },
    MarketResolved {
        market_id: MarketId,
        resolver: Address,
        outcome: Outcome,
        resolution_uri: String,
        evidence_uri: String,
        resolved_at: u64,
    },
    MarketDisputed {
        market_id: MarketId,
        disputant: Address,
        evidence_uri: String,
        bond_amount: u128,
        opened_at: u64,
    },
    MarketFinalized {
        market_id: MarketId,
        outcome: Outcome,
        finalized_at: u64,
        disputant: Option<Address>,
        bond_refunded: u128,
    },
    OrderPlaced {
        order_id: OrderId,
        market_id: MarketId,
        owner: Address,
        beneficiary: Address,
        position: Outcome,
        price: u128,
        quantity: u128,
        order_type: OrderType,
        expiration_epoch: u64,
        stake: u128,
    },
    OrderCancelled {
        order_id: OrderId,
        market_id: MarketId,
        owner: Address,
        unfilled: u128,
        refund: u128,
    },
    OrderFilled {
        order_id: OrderId,
        market_id: MarketId,
        maker_beneficiary: Address,
        taker: Address,
        taker_recipient: Address,
        maker_position: Outcome,
        price: u128,
        quantity: u128,
        cost: u128,
        fee: u128,
        remaining: u128,
    },
    PayoutClaimed {
        market_id: MarketId,
        trader: Address,
        recipient: Address,
        outcome: Outcome,
        shares: u128,
        payout: u128,
        fee: u128,
        fee_recipient: Address,
    },
    PaymentTokenUpdated {
        token: Address,
    },
    CreationAgentUpdated {
        agent: Address,
    },
    ResolutionAgentUpdated {
        agent: Address,
    },
    FeeRecipientUpdated {
        recipient: Address,
    },
    ApprovalAuthorityUpdated {
        authority: Address,
    },
    TraderApprovalRequirementUpdated {
        required: bool,
    },
    TraderApprovalUpdated {
        trader: Address,
        approved: bool,
    },
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::MarketCreated { .. } => "market_created",
            LedgerEvent::MarketResolved { .. } => "market_resolved",
            LedgerEvent::MarketDisputed { .. } => "market_disputed",
            LedgerEvent::MarketFinalized { .. } => "market_finalized",
            LedgerEvent::OrderPlaced { .. } => "order_placed",
            LedgerEvent::OrderCancelled { .. } => "order_cancelled",
            LedgerEvent::OrderFilled { .. } => "order_filled",
            LedgerEvent::PayoutClaimed { .. } => "payout_claimed",
            LedgerEvent::PaymentTokenUpdated { .. } => "payment_token_updated",
            LedgerEvent::CreationAgentUpdated { .. } => "creation_agent_updated",
            LedgerEvent::ResolutionAgentUpdated { .. } => "resolution_agent_updated",
            LedgerEvent::FeeRecipientUpdated { .. } => "fee_recipient_updated",
            LedgerEvent::ApprovalAuthorityUpdated { .. } => "approval_authority_updated",
            LedgerEvent::TraderApprovalRequirementUpdated { .. } => "trader_approval_requirement_updated",
            LedgerEvent::TraderApprovalUpdated { .. } => "trader_approval_updated",
            LedgerEvent::OwnershipTransferred { .. } => "ownership_transferred",
        }
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Subscriber interface. Publishing must not fail the committed call.
pub trait EventSink: Send + Sync {
    fn publish(&self, at: u64, event: &LedgerEvent);
}

/// Logs each event as a structured `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, at: u64, event: &LedgerEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(event = event.name(), at, %payload, "ledger event"),
            Err(e) => info!(event = event.name(), at, error = %e, "ledger event (unserializable)"),
        }
    }
}

/// Default number of records an `EventLog` retains
pub const DEFAULT_EVENT_RETENTION: usize = 10_000;

/// A published event with its position in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: u64,
    /// SHA-256 over the previous digest and this event's JSON
    pub digest: String,
    pub event: LedgerEvent,
}

#[derive(Debug, Default)]
struct LogInner {
    records: VecDeque<EventRecord>,
    next_seq: u64,
    last_digest: String,
}

/// In-process append-only event log
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<LogInner>,
    retention: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_retention(DEFAULT_EVENT_RETENTION)
    }
}

impl EventLog {
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                next_seq: 1,
                ..LogInner::default()
            }),
            retention: retention.max(1),
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records with `seq > after`, oldest first
    pub fn since(&self, after: u64) -> Vec<EventRecord> {
        self.inner()
            .records
            .iter()
            .filter(|r| r.seq > after)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_digest(&self) -> String {
        self.inner().last_digest.clone()
    }
}

fn chain_digest(previous: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

impl EventSink for EventLog {
    fn publish(&self, at: u64, event: &LedgerEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        let mut inner = self.inner();
        let digest = chain_digest(&inner.last_digest, &payload);
        let record = EventRecord {
            seq: inner.next_seq,
            at,
            digest: digest.clone(),
            event: event.clone(),
        };
        inner.next_seq += 1;
        inner.last_digest = digest;
        inner.records.push_back(record);
        while inner.records.len() > self.retention {
            inner.records.pop_front();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
