// ============================================================================
// Market Ledger - Collateral Market Ledger
// ============================================================================
//
// Composes access control, markets, orders, positions, disputes and payouts
// behind one set of operations.
//
// Every mutating call:
//   1. takes the reentrancy guard (a second mutating call fails fast)
//   2. clones the persisted state into a staging copy
//   3. validates and mutates the copy, collecting a transfer plan
//   4. executes the transfer plan against the collateral token
//   5. commits the copy, then publishes the collected events
//
// Any error before the commit drops the copy, so nothing partial persists.
// Reads never take the guard.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::access::AccessControl;
use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::escrow::{stake_for, CollateralEscrow, CollateralToken, TransferPlan};
use crate::events::{EventSink, LedgerEvent};
use crate::market::{Dispute, DisputeBook, MarketBook, MarketParams, MarketSnapshot, Resolution};
use crate::orderbook::{FillReceipt, FillRequest, Order, OrderLedger, OrderRequest};
use crate::payout::{fee_of, ClaimAmounts};
use crate::shares::{ClaimRegistry, PositionLedger, ShareBalance};
use crate::types::{Address, MarketId, OrderId, Outcome};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default dispute window: one day
pub const DEFAULT_DISPUTE_WINDOW_SECS: u64 = 86_400;

/// Default dispute bond: 100 collateral units at 6 decimals
pub const DEFAULT_DISPUTE_BOND: u128 = 100_000_000;

/// Fixed for the lifetime of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub dispute_window: u64,
    pub dispute_bond: u128,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            dispute_window: DEFAULT_DISPUTE_WINDOW_SECS,
            dispute_bond: DEFAULT_DISPUTE_BOND,
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Every entity the ledger persists. Cloned for staging, serialized for
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub access: AccessControl,
    pub payment_token: Address,
    pub markets: MarketBook,
    pub orders: OrderLedger,
    pub positions: PositionLedger,
    pub claims: ClaimRegistry,
    pub disputes: DisputeBook,
}

impl LedgerState {
    pub fn new(access: AccessControl, payment_token: Address) -> Self {
        Self {
            access,
            payment_token,
            markets: MarketBook::new(),
            orders: OrderLedger::new(),
            positions: PositionLedger::new(),
            claims: ClaimRegistry::new(),
            disputes: DisputeBook::new(),
        }
    }
}

/// Staging area of one mutating call
struct Staged {
    state: LedgerState,
    plan: TransferPlan,
    events: Vec<LedgerEvent>,
    token_swap: Option<Arc<dyn CollateralToken>>,
    now: u64,
}

impl Staged {
    fn emit(&mut self, event: Option<LedgerEvent>) {
        self.events.extend(event);
    }
}

/// Held for the duration of a mutating call
struct CallGuard<'a>(&'a AtomicBool);

impl<'a> CallGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> LedgerResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LedgerError::ReentrantCall)?;
        Ok(CallGuard(flag))
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct MarketLedger {
    state: Mutex<LedgerState>,
    guard: AtomicBool,
    escrow: RwLock<CollateralEscrow>,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
    settings: LedgerSettings,
}

impl std::fmt::Debug for MarketLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketLedger")
            .field("escrow", &self.escrow())
            .field("settings", &self.settings)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl MarketLedger {
    pub fn new(
        access: AccessControl,
        escrow: CollateralEscrow,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> LedgerResult<Self> {
        if escrow.account().is_zero() {
            return Err(LedgerError::ZeroAddress { field: "escrow" });
        }
        let payment_token = escrow.token_address();
        if payment_token.is_zero() {
            return Err(LedgerError::ZeroAddress { field: "paymentToken" });
        }
        info!(
            owner = %access.owner,
            escrow = %escrow.account(),
            token = %payment_token,
            dispute_window = settings.dispute_window,
            dispute_bond = settings.dispute_bond,
            "market ledger initialized"
        );
        Ok(Self {
            state: Mutex::new(LedgerState::new(access, payment_token)),
            guard: AtomicBool::new(false),
            escrow: RwLock::new(escrow),
            clock,
            sinks: Vec::new(),
            settings,
        })
    }

    /// Register an event subscriber
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn escrow(&self) -> CollateralEscrow {
        self.escrow
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run one mutating call all-or-nothing
    fn transact<T>(
        &self,
        op: &'static str,
        body: impl FnOnce(&mut Staged) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let result = self.transact_inner(body);
        if let Err(e) = &result {
            warn!(op, kind = ?e.kind(), error = %e, "call rejected");
        }
        result
    }

    fn transact_inner<T>(&self, body: impl FnOnce(&mut Staged) -> LedgerResult<T>) -> LedgerResult<T> {
        let call = CallGuard::acquire(&self.guard)?;
        let now = self.clock.now();
        let mut staged = Staged {
            state: self.state().clone(),
            plan: TransferPlan::new(),
            events: Vec::new(),
            token_swap: None,
            now,
        };

        let value = body(&mut staged)?;
        if !staged.plan.is_empty() {
            self.escrow().execute(&staged.plan)?;
        }

        *self.state() = staged.state;
        if let Some(token) = staged.token_swap {
            let mut escrow = self.escrow.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *escrow = CollateralEscrow::new(token, escrow.account().clone());
        }
        drop(call);

        for event in &staged.events {
            for sink in &self.sinks {
                sink.publish(now, event);
            }
        }
        Ok(value)
    }

    // ========================================================================
    // MARKETS
    // ========================================================================

    pub fn create_market(&self, caller: &Address, params: MarketParams) -> LedgerResult<MarketId> {
        let market_id = self.transact("create_market", |tx| {
            tx.state.access.require_creation_agent(caller)?;
            let market = tx.state.markets.create(caller, params, tx.now)?;
            let event = LedgerEvent::MarketCreated {
                market_id: market.id,
                creator: caller.clone(),
                question_uri: market.question_uri.clone(),
                oracle_uri: market.oracle_uri.clone(),
                open_epoch: market.open_epoch,
                close_epoch: market.close_epoch,
                fee_bps: market.fee_bps,
            };
            let id = market.id;
            tx.events.push(event);
            Ok(id)
        })?;
        info!(%market_id, creator = %caller, "market created");
        Ok(market_id)
    }

    pub fn resolve_market(
        &self,
        caller: &Address,
        market_id: MarketId,
        resolution: Resolution,
    ) -> LedgerResult<u64> {
        let resolved_at = self.transact("resolve_market", |tx| {
            tx.state.access.require_resolution_agent(caller)?;
            let resolved_at = tx.state.markets.get_mut(market_id)?.resolve(caller, &resolution, tx.now)?;
            tx.events.push(LedgerEvent::MarketResolved {
                market_id,
                resolver: caller.clone(),
                outcome: resolution.outcome,
                resolution_uri: resolution.resolution_uri.clone(),
                evidence_uri: resolution.evidence_uri.clone(),
                resolved_at,
            });
            Ok(resolved_at)
        })?;
        info!(%market_id, outcome = %resolution.outcome, resolved_at, "market resolved");
        Ok(resolved_at)
    }

    /// Contest a resolution, escrowing the dispute bond from the caller
    pub fn dispute_market(&self, caller: &Address, market_id: MarketId, evidence_uri: &str) -> LedgerResult<()> {
        let bond = self.settings.dispute_bond;
        self.transact("dispute_market", |tx| {
            tx.state.markets.get_mut(market_id)?.open_dispute(evidence_uri)?;
            tx.plan.pull(caller, bond);
            tx.state.disputes.open(Dispute {
                market_id,
                disputant: caller.clone(),
                evidence_uri: evidence_uri.to_string(),
                bond_amount: bond,
                opened_at: tx.now,
            });
            tx.events.push(LedgerEvent::MarketDisputed {
                market_id,
                disputant: caller.clone(),
                evidence_uri: evidence_uri.to_string(),
                bond_amount: bond,
                opened_at: tx.now,
            });
            Ok(())
        })?;
        info!(%market_id, disputant = %caller, bond, "market disputed");
        Ok(())
    }

    pub fn finalize_market(&self, caller: &Address, market_id: MarketId) -> LedgerResult<Outcome> {
        let window = self.settings.dispute_window;
        let outcome = self.transact("finalize_market", |tx| {
            tx.state.access.require_owner(caller)?;
            let market = tx.state.markets.get_mut(market_id)?;
            market.finalize(tx.now, window)?;
            let outcome = market.outcome;

            let dispute = tx.state.disputes.clear(market_id);
            let (disputant, bond_refunded) = match dispute {
                Some(d) => {
                    tx.plan.pay(&d.disputant, d.bond_amount);
                    (Some(d.disputant), d.bond_amount)
                }
                None => (None, 0),
            };
            tx.events.push(LedgerEvent::MarketFinalized {
                market_id,
                outcome,
                finalized_at: tx.now,
                disputant,
                bond_refunded,
            });
            Ok(outcome)
        })?;
        info!(%market_id, %outcome, "market finalized");
        Ok(outcome)
    }

    // ========================================================================
    // ORDERS
    // ========================================================================

    /// Escrow the stake and rest a new order
    pub fn submit_order(&self, caller: &Address, request: OrderRequest) -> LedgerResult<OrderId> {
        let order_id = self.transact("submit_order", |tx| {
            tx.state.access.require_trader(caller)?;
            tx.state.markets.get(request.market_id)?.require_trading(tx.now)?;
            request.validate(tx.now)?;
            if request.recipient.as_ref().is_some_and(Address::is_zero) {
                return Err(LedgerError::ZeroAddress { field: "recipient" });
            }

            let stake = stake_for(request.position, request.price, request.quantity)?;
            tx.plan.pull(caller, stake);
            let order = tx.state.orders.insert(caller, &request, tx.now);
            let event = LedgerEvent::OrderPlaced {
                order_id: order.id,
                market_id: order.market_id,
                owner: order.owner.clone(),
                beneficiary: order.beneficiary.clone(),
                position: order.position,
                price: order.price,
                quantity: order.quantity,
                order_type: order.order_type,
                expiration_epoch: order.expiration_epoch,
                stake,
            };
            let id = order.id;
            tx.events.push(event);
            Ok(id)
        })?;
        info!(
            %order_id,
            market_id = %request.market_id,
            owner = %caller,
            position = %request.position,
            price = request.price,
            quantity = request.quantity,
            "order placed"
        );
        Ok(order_id)
    }

    /// Deactivate an order and refund the stake of its unfilled remainder
    pub fn cancel_order(&self, caller: &Address, order_id: OrderId) -> LedgerResult<u128> {
        let refund = self.transact("cancel_order", |tx| {
            let unfilled = tx.state.orders.cancel(order_id, caller)?;
            let order = tx.state.orders.get(order_id)?;
            let refund = stake_for(order.position, order.price, unfilled)?;
            tx.plan.pay(&order.owner, refund);
            let event = LedgerEvent::OrderCancelled {
                order_id,
                market_id: order.market_id,
                owner: order.owner.clone(),
                unfilled,
                refund,
            };
            tx.events.push(event);
            Ok(refund)
        })?;
        info!(%order_id, owner = %caller, refund, "order cancelled");
        Ok(refund)
    }

    /// Take the opposite side of one resting order at its price
    pub fn fill_order(&self, caller: &Address, order_id: OrderId, fill: FillRequest) -> LedgerResult<FillReceipt> {
        let receipt = self.transact("fill_order", |tx| {
            let order = tx.state.orders.get(order_id)?.clone();
            tx.state.access.require_trader(&order.owner)?;
            tx.state.access.require_trader(caller)?;
            order.require_active()?;
            let market = tx.state.markets.get(order.market_id)?;
            market.require_trading(tx.now)?;
            let fee_bps = market.fee_bps;
            order.require_unexpired(tx.now)?;
            order.check_fill(fill.limit_price, fill.quantity)?;

            let taker_position = order
                .position
                .opposite()
                .ok_or(LedgerError::InvalidPosition { position: order.position })?;
            let taker_recipient = match &fill.recipient {
                Some(r) if r.is_zero() => return Err(LedgerError::ZeroAddress { field: "recipient" }),
                Some(r) => r.clone(),
                None => caller.clone(),
            };

            let cost = stake_for(taker_position, order.price, fill.quantity)?;
            let fee = fee_of(fill.quantity, fee_bps)?;
            tx.plan.pull(caller, cost);

            tx.state
                .positions
                .credit(order.market_id, &order.beneficiary, order.position, fill.quantity)?;
            tx.state
                .positions
                .credit(order.market_id, &taker_recipient, taker_position, fill.quantity)?;
            let resting = tx.state.orders.get_mut(order_id)?;
            resting.apply_fill(fill.quantity);
            let remaining = resting.remaining();
            tx.state.markets.get_mut(order.market_id)?.record_fill(fill.quantity)?;

            tx.events.push(LedgerEvent::OrderFilled {
                order_id,
                market_id: order.market_id,
                maker_beneficiary: order.beneficiary.clone(),
                taker: caller.clone(),
                taker_recipient,
                maker_position: order.position,
                price: order.price,
                quantity: fill.quantity,
                cost,
                fee,
                remaining,
            });
            Ok(FillReceipt { cost, fee })
        })?;
        info!(%order_id, taker = %caller, quantity = fill.quantity, cost = receipt.cost, "order filled");
        Ok(receipt)
    }

    // ========================================================================
    // PAYOUTS
    // ========================================================================

    /// Withdraw the caller's whole winning balance, net of the market fee
    pub fn claim_payout(
        &self,
        caller: &Address,
        market_id: MarketId,
        position: Outcome,
        recipient: Option<Address>,
    ) -> LedgerResult<ClaimAmounts> {
        let amounts = self.transact("claim_payout", |tx| {
            let market = tx.state.markets.get(market_id)?;
            let outcome = market.final_outcome()?;
            let fee_bps = market.fee_bps;
            tx.state.claims.require_unclaimed(market_id, caller)?;
            if position != outcome {
                return Err(LedgerError::NotWinningPosition { market_id, position, outcome });
            }
            let recipient = match recipient {
                Some(r) if r.is_zero() => return Err(LedgerError::ZeroAddress { field: "recipient" }),
                Some(r) => r,
                None => caller.clone(),
            };

            let shares = tx.state.positions.withdraw_all(market_id, caller, outcome)?;
            if shares == 0 {
                return Err(LedgerError::NothingToClaim { market_id, trader: caller.clone(), outcome });
            }
            let amounts = ClaimAmounts::compute(shares, fee_bps)?;
            tx.state.claims.record(market_id, caller);

            let fee_recipient = tx.state.access.fee_recipient.clone();
            tx.plan.pay(&recipient, amounts.payout);
            tx.plan.pay(&fee_recipient, amounts.fee);
            tx.events.push(LedgerEvent::PayoutClaimed {
                market_id,
                trader: caller.clone(),
                recipient,
                outcome,
                shares,
                payout: amounts.payout,
                fee: amounts.fee,
                fee_recipient,
            });
            Ok(amounts)
        })?;
        info!(%market_id, trader = %caller, payout = amounts.payout, fee = amounts.fee, "payout claimed");
        Ok(amounts)
    }

    // ========================================================================
    // ADMINISTRATION
    // ========================================================================

    /// Point the escrow at a new collateral token. Balances held under the
    /// previous token stay with it.
    pub fn set_payment_token(&self, caller: &Address, token: Arc<dyn CollateralToken>) -> LedgerResult<()> {
        let address = token.address();
        self.transact("set_payment_token", |tx| {
            tx.state.access.require_owner(caller)?;
            if address.is_zero() {
                return Err(LedgerError::ZeroAddress { field: "paymentToken" });
            }
            if address == tx.state.payment_token {
                return Ok(());
            }
            tx.state.payment_token = address.clone();
            tx.token_swap = Some(token);
            tx.events.push(LedgerEvent::PaymentTokenUpdated { token: address.clone() });
            Ok(())
        })?;
        info!(token = %address, "payment token set");
        Ok(())
    }

    pub fn set_creation_agent(&self, caller: &Address, agent: Address) -> LedgerResult<()> {
        self.transact("set_creation_agent", |tx| {
            let event = tx.state.access.set_creation_agent(caller, agent)?;
            tx.emit(event);
            Ok(())
        })
    }

    pub fn set_resolution_agent(&self, caller: &Address, agent: Address) -> LedgerResult<()> {
        self.transact("set_resolution_agent", |tx| {
            let event = tx.state.access.set_resolution_agent(caller, agent)?;
            tx.emit(event);
            Ok(())
        })
    }

    pub fn set_fee_recipient(&self, caller: &Address, recipient: Address) -> LedgerResult<()> {
        self.transact("set_fee_recipient", |tx| {
            let event = tx.state.access.set_fee_recipient(caller, recipient)?;
            tx.emit(event);
            Ok(())
        })
    }

    pub fn set_approval_authority(&self, caller: &Address, authority: Address) -> LedgerResult<()> {
        self.transact("set_approval_authority", |tx| {
            let events = tx.state.access.set_approval_authority(caller, authority)?;
            tx.events.extend(events);
            Ok(())
        })
    }

    pub fn set_trader_approval_required(&self, caller: &Address, required: bool) -> LedgerResult<()> {
        self.transact("set_trader_approval_required", |tx| {
            let event = tx.state.access.set_trader_approval_required(caller, required)?;
            tx.emit(event);
            Ok(())
        })
    }

    pub fn set_trader_approval(&self, caller: &Address, trader: Address, approved: bool) -> LedgerResult<()> {
        self.transact("set_trader_approval", |tx| {
            let event = tx.state.access.set_trader_approval(caller, trader, approved)?;
            tx.emit(event);
            Ok(())
        })
    }

    pub fn transfer_ownership(&self, caller: &Address, new_owner: Address) -> LedgerResult<()> {
        self.transact("transfer_ownership", |tx| {
            let event = tx.state.access.transfer_ownership(caller, new_owner)?;
            tx.emit(event);
            Ok(())
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn settings(&self) -> LedgerSettings {
        self.settings
    }

    pub fn get_market(&self, market_id: MarketId) -> LedgerResult<MarketSnapshot> {
        let now = self.clock.now();
        let state = self.state();
        let market = state.markets.get(market_id)?;
        Ok(MarketSnapshot::of(market, now, self.settings.dispute_window))
    }

    pub fn list_markets(&self) -> Vec<MarketSnapshot> {
        let now = self.clock.now();
        self.state()
            .markets
            .list()
            .map(|m| MarketSnapshot::of(m, now, self.settings.dispute_window))
            .collect()
    }

    /// The market's open dispute, if any
    pub fn get_dispute(&self, market_id: MarketId) -> LedgerResult<Option<Dispute>> {
        let state = self.state();
        state.markets.get(market_id)?;
        Ok(state.disputes.get(market_id).cloned())
    }

    pub fn get_order(&self, order_id: OrderId) -> LedgerResult<Order> {
        self.state().orders.get(order_id).cloned()
    }

    pub fn get_orders_by_owner(&self, owner: &Address) -> Vec<Order> {
        self.state().orders.orders_by_owner(owner)
    }

    pub fn position_of(&self, market_id: MarketId, trader: &Address) -> ShareBalance {
        self.state().positions.balance_of(market_id, trader)
    }

    pub fn has_claimed(&self, market_id: MarketId, trader: &Address) -> bool {
        self.state().claims.has_claimed(market_id, trader)
    }

    pub fn is_trader_approved(&self, trader: &Address) -> bool {
        self.state().access.is_trader_approved(trader)
    }

    pub fn access(&self) -> AccessControl {
        self.state().access.clone()
    }

    pub fn payment_token(&self) -> Address {
        self.state().payment_token.clone()
    }

    pub fn escrow_account(&self) -> Address {
        self.escrow().account().clone()
    }

    pub fn escrow_balance(&self) -> u128 {
        self.escrow().balance()
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn snapshot(&self) -> LedgerState {
        self.state().clone()
    }

    /// Replace every persisted entity. The escrow's token must already hold
    /// the balances that back `state`.
    pub fn restore(&self, state: LedgerState) -> LedgerResult<()> {
        let _call = CallGuard::acquire(&self.guard)?;
        let token = self.escrow().token_address();
        if state.payment_token != token {
            warn!(saved = %state.payment_token, current = %token, "restored state names a different payment token");
        }
        debug!(
            markets = state.markets.markets.len(),
            orders = state.orders.orders.len(),
            "ledger state restored"
        );
        *self.state() = state;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
