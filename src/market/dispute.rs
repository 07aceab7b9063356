// ============================================================================
// Disputes - bonded challenges to a resolution
// ============================================================================
//
// At most one dispute per market. The bond is escrowed when the dispute
// opens and returned to the disputant when the market finalizes, whatever
// the final outcome. A new resolution overwrites the record.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Address, MarketId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub market_id: MarketId,
    pub disputant: Address,
    pub evidence_uri: String,
    pub bond_amount: u128,
    pub opened_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeBook {
    pub disputes: BTreeMap<MarketId, Dispute>,
}

impl DisputeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, market_id: MarketId) -> Option<&Dispute> {
        self.disputes.get(&market_id)
    }

    pub fn open(&mut self, dispute: Dispute) {
        self.disputes.insert(dispute.market_id, dispute);
    }

    /// Remove the record; the caller refunds its bond
    pub fn clear(&mut self, market_id: MarketId) -> Option<Dispute> {
        self.disputes.remove(&market_id)
    }
}
