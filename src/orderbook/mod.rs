// ============================================================================
// Order Ledger - Collateral Market Ledger
// ============================================================================
//
// Bookkeeping for resting orders: creation, fills and cancellation.
//
// This is not a matching engine. There is no price-time queue and no
// auto-matching; a taker fills one specific resting order by id. Book
// aggregation is left to external readers of the event stream.
//
// ============================================================================

pub mod orders;

pub use orders::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Address, OrderId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLedger {
    /// All orders by id
    pub orders: BTreeMap<OrderId, Order>,

    /// Owner -> order ids, in submission order
    pub by_owner: BTreeMap<Address, Vec<OrderId>>,

    /// Last assigned id
    pub last_id: u64,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a validated order under the next id
    pub fn insert(&mut self, owner: &Address, request: &OrderRequest, now: u64) -> &Order {
        self.last_id += 1;
        let id = OrderId(self.last_id);
        let order = Order {
            id,
            market_id: request.market_id,
            owner: owner.clone(),
            beneficiary: request.recipient.clone().unwrap_or_else(|| owner.clone()),
            position: request.position,
            price: request.price,
            quantity: request.quantity,
            filled: 0,
            order_type: request.order_type,
            expiration_epoch: request.expiration_epoch,
            active: true,
            created_at: now,
        };
        self.by_owner.entry(owner.clone()).or_default().push(id);
        self.orders.entry(id).or_insert(order)
    }

    pub fn get(&self, order_id: OrderId) -> LedgerResult<&Order> {
        self.orders
            .get(&order_id)
            .ok_or(LedgerError::OrderNotFound { order_id })
    }

    pub fn get_mut(&mut self, order_id: OrderId) -> LedgerResult<&mut Order> {
        self.orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotFound { order_id })
    }

    /// Every order `owner` ever submitted, active or not
    pub fn orders_by_owner(&self, owner: &Address) -> Vec<Order> {
        self.by_owner
            .get(owner)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Cancel an active order owned by `caller`; returns the unfilled quantity
    pub fn cancel(&mut self, order_id: OrderId, caller: &Address) -> LedgerResult<u128> {
        let order = self.get_mut(order_id)?;
        if order.owner != *caller {
            return Err(LedgerError::NotOrderOwner { order_id, caller: caller.clone() });
        }
        order.require_active()?;
        Ok(order.cancel())
    }
}

// ============================================================================
// TESTS
// ============================================================================
