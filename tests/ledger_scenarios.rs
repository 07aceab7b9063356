/// End-to-end ledger scenarios against an in-memory collateral token
/// and a manually advanced clock.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use collateral_market_ledger::{
    stake_for, AccessControl, Address, ClaimAmounts, Clock, CollateralEscrow, CollateralToken, EventLog,
    FillReceipt, FillRequest, InMemoryToken, LedgerError, LedgerEvent, LedgerResult, LedgerSettings,
    ManualClock, MarketId, MarketLedger, MarketParams, MarketStatus, OrderId, OrderRequest, Outcome,
    Resolution, TokenError,
};

// ============================================================================
// TEST CONSTANTS
// ============================================================================

const DAY: u64 = 86_400;
const START: u64 = 1_750_000_000;
const FUNDING: u128 = 1_000_000_000;
const BOND: u128 = 100_000_000;

const OWNER: &str = "owner";
const CREATOR: &str = "creation-agent";
const RESOLVER: &str = "resolution-agent";
const TREASURY: &str = "treasury";
const ESCROW: &str = "escrow";

const ALICE: &str = "alice";
const BOB: &str = "bob";
const CAROL: &str = "carol";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn addr(s: &str) -> Address {
    Address::from(s)
}

struct Harness {
    ledger: Arc<MarketLedger>,
    token: Arc<InMemoryToken>,
    clock: Arc<ManualClock>,
    log: Arc<EventLog>,
}

impl Harness {
    fn new() -> Self {
        let token = Arc::new(InMemoryToken::new("usdc"));
        Self::with_collateral(token.clone(), token)
    }

    /// `collateral` is what the escrow talks to; `token` holds the balances
    fn with_collateral(token: Arc<InMemoryToken>, collateral: Arc<dyn CollateralToken>) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let log = Arc::new(EventLog::default());
        let access = AccessControl::new(addr(OWNER), addr(CREATOR), addr(RESOLVER), addr(TREASURY)).unwrap();
        let escrow = CollateralEscrow::new(collateral, addr(ESCROW));
        let settings = LedgerSettings { dispute_window: DAY, dispute_bond: BOND };
        let ledger = MarketLedger::new(access, escrow, clock.clone(), settings)
            .unwrap()
            .with_sink(log.clone());
        for trader in [ALICE, BOB, CAROL] {
            token.mint(&addr(trader), FUNDING).unwrap();
            token.approve(&addr(trader), &addr(ESCROW), u128::MAX);
        }
        Self {
            ledger: Arc::new(ledger),
            token,
            clock,
            log,
        }
    }

    fn balance(&self, who: &str) -> u128 {
        self.token.balance_of(&addr(who))
    }

    fn create_market(&self, fee_bps: u32) -> MarketId {
        self.ledger
            .create_market(
                &addr(CREATOR),
                MarketParams {
                    question_uri: "ipfs://question".to_string(),
                    oracle_uri: "https://oracle.example/feed".to_string(),
                    open_epoch: START,
                    close_epoch: START + DAY,
                    fee_bps,
                },
            )
            .unwrap()
    }

    fn submit(&self, who: &str, market_id: MarketId, position: Outcome, price: u128, quantity: u128) -> OrderId {
        self.ledger
            .submit_order(&addr(who), OrderRequest::new(market_id, position, price, quantity))
            .unwrap()
    }

    fn resolve(&self, market_id: MarketId, outcome: Outcome) -> LedgerResult<u64> {
        self.ledger.resolve_market(
            &addr(RESOLVER),
            market_id,
            Resolution {
                outcome,
                resolution_uri: "ipfs://resolution".to_string(),
                evidence_uri: "ipfs://evidence".to_string(),
                resolved_at: None,
            },
        )
    }

    /// Close, resolve, wait out the dispute window and finalize
    fn settle(&self, market_id: MarketId, outcome: Outcome) {
        self.clock.set(START + DAY + 1);
        self.resolve(market_id, outcome).unwrap();
        self.clock.advance(DAY);
        self.ledger.finalize_market(&addr(OWNER), market_id).unwrap();
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_full_lifecycle_payout_net_of_fee() {
    let h = Harness::new();
    let market_id = h.create_market(500);

    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 100_000_000);
    assert_eq!(h.balance(ALICE), FUNDING - 50_000_000);
    assert_eq!(h.ledger.escrow_balance(), 50_000_000);

    let receipt = h
        .ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 100_000_000))
        .unwrap();
    assert_eq!(receipt, FillReceipt { cost: 50_000_000, fee: 5_000_000 });
    assert_eq!(h.balance(ESCROW), 100_000_000);

    h.settle(market_id, Outcome::Yes);
    assert_eq!(h.ledger.get_market(market_id).unwrap().market.status, MarketStatus::Finalized);

    let claim = h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::Yes, None).unwrap();
    assert_eq!(claim, ClaimAmounts { shares: 100_000_000, fee: 5_000_000, payout: 95_000_000 });
    assert_eq!(h.balance(ALICE), FUNDING - 50_000_000 + 95_000_000);
    assert_eq!(h.balance(TREASURY), 5_000_000);
    assert_eq!(h.balance(ESCROW), 0);
    assert!(h.ledger.has_claimed(market_id, &addr(ALICE)));
    assert_eq!(h.ledger.position_of(market_id, &addr(ALICE)).yes, 0);
}

#[test]
fn test_two_partial_fills_exhaust_order() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 600_000, 100_000_000);

    let first = h
        .ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(600_000, 50_000_000))
        .unwrap();
    assert_eq!(first.cost, 20_000_000);
    let order = h.ledger.get_order(order_id).unwrap();
    assert!(order.active);
    assert_eq!(order.filled, 50_000_000);

    h.ledger
        .fill_order(&addr(CAROL), order_id, FillRequest::new(600_000, 50_000_000))
        .unwrap();
    let order = h.ledger.get_order(order_id).unwrap();
    assert!(!order.active);
    assert_eq!(order.filled, order.quantity);

    assert_eq!(h.ledger.position_of(market_id, &addr(ALICE)).yes, 100_000_000);
    assert_eq!(h.ledger.position_of(market_id, &addr(BOB)).no, 50_000_000);
    assert_eq!(h.ledger.position_of(market_id, &addr(CAROL)).no, 50_000_000);
    assert_eq!(h.ledger.get_market(market_id).unwrap().market.total_collateral, 100_000_000);

    // a filled order cannot be filled or cancelled again
    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(600_000, 1)),
        Err(LedgerError::OrderNotActive { .. })
    ));
    assert!(matches!(
        h.ledger.cancel_order(&addr(ALICE), order_id),
        Err(LedgerError::OrderNotActive { .. })
    ));
}

#[test]
fn test_dispute_bond_refunded_on_finalize() {
    let h = Harness::new();
    let market_id = h.create_market(100);
    h.clock.set(START + DAY);
    h.resolve(market_id, Outcome::No).unwrap();

    assert!(matches!(
        h.ledger.dispute_market(&addr(CAROL), market_id, ""),
        Err(LedgerError::EmptyField { .. })
    ));

    h.ledger.dispute_market(&addr(CAROL), market_id, "ipfs://counter-evidence").unwrap();
    assert_eq!(h.balance(CAROL), FUNDING - BOND);
    assert_eq!(h.balance(ESCROW), BOND);
    let dispute = h.ledger.get_dispute(market_id).unwrap().unwrap();
    assert_eq!(dispute.disputant, addr(CAROL));
    assert_eq!(dispute.bond_amount, BOND);

    let snapshot = h.ledger.get_market(market_id).unwrap();
    assert_eq!(snapshot.market.status, MarketStatus::Disputed);
    assert!(snapshot.market.dispute_active);
    assert!(!snapshot.finalizable);

    assert_eq!(
        h.ledger.dispute_market(&addr(BOB), market_id, "ipfs://more"),
        Err(LedgerError::DisputeAlreadyActive { market_id })
    );

    h.clock.advance(DAY);
    h.ledger.finalize_market(&addr(OWNER), market_id).unwrap();
    assert_eq!(h.balance(CAROL), FUNDING);
    assert_eq!(h.balance(ESCROW), 0);
    assert!(h.ledger.get_dispute(market_id).unwrap().is_none());
    assert_eq!(h.ledger.get_market(market_id).unwrap().market.outcome, Outcome::No);
}

#[test]
fn test_overfill_leaves_order_unchanged() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::No, 400_000, 1_000);
    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(400_000, 600))
        .unwrap();
    let bob_before = h.balance(BOB);

    assert_eq!(
        h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(400_000, 401)),
        Err(LedgerError::Overfill { order_id, requested: 401, remaining: 400 })
    );
    let order = h.ledger.get_order(order_id).unwrap();
    assert_eq!(order.filled, 600);
    assert!(order.active);
    assert_eq!(h.balance(BOB), bob_before);
}

#[test]
fn test_cancel_partially_filled_refunds_remainder() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::No, 350_000, 3_000_000);
    let staked = stake_for(Outcome::No, 350_000, 3_000_000).unwrap();
    assert_eq!(h.balance(ALICE), FUNDING - staked);

    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(350_000, 1_000_000))
        .unwrap();

    assert!(matches!(
        h.ledger.cancel_order(&addr(BOB), order_id),
        Err(LedgerError::NotOrderOwner { .. })
    ));

    let refund = h.ledger.cancel_order(&addr(ALICE), order_id).unwrap();
    assert_eq!(refund, stake_for(Outcome::No, 350_000, 2_000_000).unwrap());
    assert_eq!(h.balance(ALICE), FUNDING - staked + refund);

    let order = h.ledger.get_order(order_id).unwrap();
    assert!(!order.active);
    assert_eq!(order.filled, 1_000_000);
    assert_eq!(h.ledger.position_of(market_id, &addr(ALICE)).no, 1_000_000);
}

#[test]
fn test_finalize_before_window_fails_for_everyone() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    h.clock.set(START + DAY);
    let resolved_at = h.resolve(market_id, Outcome::Yes).unwrap();
    h.clock.set(resolved_at + DAY - 1);

    assert!(!h.ledger.get_market(market_id).unwrap().finalizable);
    assert!(matches!(
        h.ledger.finalize_market(&addr(OWNER), market_id),
        Err(LedgerError::DisputeWindowOpen { .. })
    ));
    assert!(matches!(
        h.ledger.finalize_market(&addr(ALICE), market_id),
        Err(LedgerError::NotOwner { .. })
    ));

    h.clock.advance(1);
    assert!(h.ledger.get_market(market_id).unwrap().finalizable);
    h.ledger.finalize_market(&addr(OWNER), market_id).unwrap();
}

#[test]
fn test_claim_at_most_once_per_market() {
    let h = Harness::new();
    let market_id = h.create_market(250);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 700_000, 1_000);
    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(700_000, 1_000))
        .unwrap();
    // alice also picks up NO shares on a second order
    let other = h.submit(BOB, market_id, Outcome::Yes, 700_000, 10);
    h.ledger
        .fill_order(&addr(ALICE), other, FillRequest::new(700_000, 10))
        .unwrap();
    h.settle(market_id, Outcome::Yes);

    assert!(matches!(
        h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::No, None),
        Err(LedgerError::NotWinningPosition { .. })
    ));
    h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::Yes, None).unwrap();
    assert!(matches!(
        h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::Yes, Some(addr(CAROL))),
        Err(LedgerError::AlreadyClaimed { .. })
    ));
    assert!(matches!(
        h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::No, None),
        Err(LedgerError::AlreadyClaimed { .. })
    ));
}

#[test]
fn test_claim_routes_payout_to_recipient() {
    let h = Harness::new();
    let market_id = h.create_market(1_000);
    let order_id = h.submit(ALICE, market_id, Outcome::No, 200_000, 10_000);
    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(200_000, 10_000))
        .unwrap();
    h.settle(market_id, Outcome::No);

    assert!(matches!(
        h.ledger.claim_payout(&addr(BOB), market_id, Outcome::No, None),
        Err(LedgerError::NothingToClaim { .. })
    ));
    let claim = h
        .ledger
        .claim_payout(&addr(ALICE), market_id, Outcome::No, Some(addr("cold-wallet")))
        .unwrap();
    assert_eq!(claim.payout + claim.fee, claim.shares);
    assert_eq!(claim.fee, 1_000);
    assert_eq!(h.balance("cold-wallet"), 9_000);
    assert_eq!(h.balance(TREASURY), 1_000);
}

#[test]
fn test_claim_requires_finalized_market() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 10);
    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 10))
        .unwrap();
    h.clock.set(START + DAY);
    h.resolve(market_id, Outcome::Yes).unwrap();

    assert!(matches!(
        h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::Yes, None),
        Err(LedgerError::UnexpectedStatus { .. })
    ));
    assert!(!h.ledger.has_claimed(market_id, &addr(ALICE)));
}

#[test]
fn test_rounding_dust_is_not_reconciled() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 333_333, 7);
    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(333_333, 7))
        .unwrap();
    // 2 + 4 locked against 7 shares
    assert_eq!(h.balance(ESCROW), 6);

    h.settle(market_id, Outcome::Yes);
    assert_eq!(
        h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::Yes, None),
        Err(LedgerError::InsufficientEscrow { required: 7, available: 6 })
    );
    // nothing changed: the shares are still there
    assert_eq!(h.ledger.position_of(market_id, &addr(ALICE)).yes, 7);
    assert!(!h.ledger.has_claimed(market_id, &addr(ALICE)));
}

#[test]
fn test_trading_window_and_expiration() {
    let h = Harness::new();
    let market_id = h.create_market(0);

    let expiring = h
        .ledger
        .submit_order(
            &addr(ALICE),
            OrderRequest::new(market_id, Outcome::Yes, 500_000, 10).with_expiration(START + 60),
        )
        .unwrap();
    assert!(matches!(
        h.ledger.submit_order(
            &addr(ALICE),
            OrderRequest::new(market_id, Outcome::Yes, 500_000, 10).with_expiration(START - 1),
        ),
        Err(LedgerError::InvalidExpiration { .. })
    ));

    h.clock.advance(61);
    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), expiring, FillRequest::new(500_000, 1)),
        Err(LedgerError::OrderExpired { .. })
    ));
    // expired orders are not swept; the owner can still cancel
    assert_eq!(h.ledger.cancel_order(&addr(ALICE), expiring).unwrap(), 5);

    let resting = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 10);
    h.clock.set(START + DAY + 1);
    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), resting, FillRequest::new(500_000, 1)),
        Err(LedgerError::OutsideTradingWindow { .. })
    ));
    assert!(matches!(
        h.ledger
            .submit_order(&addr(ALICE), OrderRequest::new(market_id, Outcome::No, 500_000, 10)),
        Err(LedgerError::OutsideTradingWindow { .. })
    ));
}

#[test]
fn test_slippage_limit_is_taker_side() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let yes = h.submit(ALICE, market_id, Outcome::Yes, 550_000, 10);
    let no = h.submit(ALICE, market_id, Outcome::No, 550_000, 10);

    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), yes, FillRequest::new(560_000, 1)),
        Err(LedgerError::SlippageExceeded { .. })
    ));
    h.ledger.fill_order(&addr(BOB), yes, FillRequest::new(540_000, 1)).unwrap();

    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), no, FillRequest::new(540_000, 1)),
        Err(LedgerError::SlippageExceeded { .. })
    ));
    h.ledger.fill_order(&addr(BOB), no, FillRequest::new(560_000, 1)).unwrap();

    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), no, FillRequest::new(1_000_000, 1)),
        Err(LedgerError::InvalidPrice { .. })
    ));
}

#[test]
fn test_role_gates() {
    let h = Harness::new();
    assert!(matches!(
        h.ledger.create_market(
            &addr(ALICE),
            MarketParams {
                question_uri: "q".to_string(),
                oracle_uri: "o".to_string(),
                open_epoch: START,
                close_epoch: START,
                fee_bps: 0,
            },
        ),
        Err(LedgerError::NotCreationAgent { .. })
    ));

    let market_id = h.create_market(0);
    h.clock.set(START + DAY - 1);
    assert!(matches!(h.resolve(market_id, Outcome::Yes), Err(LedgerError::MarketNotClosed { .. })));

    h.clock.set(START + DAY);
    assert!(matches!(
        h.ledger.resolve_market(
            &addr(ALICE),
            market_id,
            Resolution {
                outcome: Outcome::Yes,
                resolution_uri: "r".to_string(),
                evidence_uri: "e".to_string(),
                resolved_at: None,
            },
        ),
        Err(LedgerError::NotResolutionAgent { .. })
    ));

    // rotated agents take over immediately
    h.ledger.set_resolution_agent(&addr(OWNER), addr(CAROL)).unwrap();
    assert!(matches!(h.resolve(market_id, Outcome::Yes), Err(LedgerError::NotResolutionAgent { .. })));
}

#[test]
fn test_allowlist_gates_both_sides_of_a_fill() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 100);

    h.ledger.set_trader_approval_required(&addr(OWNER), true).unwrap();
    assert!(matches!(
        h.ledger
            .submit_order(&addr(BOB), OrderRequest::new(market_id, Outcome::No, 500_000, 1)),
        Err(LedgerError::TraderNotApproved { .. })
    ));

    h.ledger.set_trader_approval(&addr(OWNER), addr(BOB), true).unwrap();
    // resting order's owner is not approved
    assert_eq!(
        h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 1)),
        Err(LedgerError::TraderNotApproved { trader: addr(ALICE) })
    );

    h.ledger.set_approval_authority(&addr(OWNER), addr("kyc-desk")).unwrap();
    assert!(h.ledger.is_trader_approved(&addr("kyc-desk")));
    h.ledger.set_trader_approval(&addr("kyc-desk"), addr(ALICE), true).unwrap();
    h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 1)).unwrap();

    assert!(matches!(
        h.ledger.set_trader_approval(&addr(CAROL), addr(CAROL), true),
        Err(LedgerError::NotApprovalAuthority { .. })
    ));
    assert!(matches!(
        h.ledger.set_fee_recipient(&addr(OWNER), Address::zero()),
        Err(LedgerError::ZeroAddress { field: "feeRecipient" })
    ));
}

#[test]
fn test_events_follow_commits_only() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 10);
    let _ = h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 11));
    h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 10)).unwrap();
    // idempotent toggles emit nothing
    h.ledger.set_trader_approval_required(&addr(OWNER), false).unwrap();

    let names: Vec<&str> = h.log.since(0).iter().map(|r| r.event.name()).collect();
    assert_eq!(names, vec!["market_created", "order_placed", "order_filled"]);

    let records = h.log.since(2);
    match &records[0].event {
        LedgerEvent::OrderFilled { quantity, remaining, taker, .. } => {
            assert_eq!(*quantity, 10);
            assert_eq!(*remaining, 0);
            assert_eq!(*taker, addr(BOB));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(records[0].at, h.clock.now());
}

#[test]
fn test_ownership_transfer() {
    let h = Harness::new();
    h.ledger.transfer_ownership(&addr(OWNER), addr("new-owner")).unwrap();
    assert!(matches!(
        h.ledger.set_creation_agent(&addr(OWNER), addr(ALICE)),
        Err(LedgerError::NotOwner { .. })
    ));
    h.ledger.set_creation_agent(&addr("new-owner"), addr(ALICE)).unwrap();
    assert_eq!(h.ledger.access().creation_agent, addr(ALICE));
}

// ============================================================================
// REENTRANCY
// ============================================================================

/// Token that calls back into the ledger while collateral is being pulled
struct CallbackToken {
    inner: InMemoryToken,
    ledger: OnceLock<Weak<MarketLedger>>,
    observed: Mutex<Vec<LedgerResult<()>>>,
    reads: Mutex<Vec<bool>>,
}

impl CollateralToken for CallbackToken {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        self.inner.transfer(sender, to, amount)
    }

    fn transfer_from(&self, spender: &Address, from: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        if let Some(ledger) = self.ledger.get().and_then(Weak::upgrade) {
            let nested = ledger.cancel_order(from, OrderId(1)).map(|_| ());
            self.observed.lock().unwrap().push(nested);
            self.reads.lock().unwrap().push(ledger.get_market(MarketId(1)).is_ok());
        }
        self.inner.transfer_from(spender, from, to, amount)
    }

    fn reverse_transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        self.inner.reverse_transfer(sender, to, amount)
    }

    fn balance_of(&self, owner: &Address) -> u128 {
        self.inner.balance_of(owner)
    }
}

#[test]
fn test_reentrant_call_from_token_fails_fast() {
    let token = Arc::new(CallbackToken {
        inner: InMemoryToken::new("hook-token"),
        ledger: OnceLock::new(),
        observed: Mutex::new(Vec::new()),
        reads: Mutex::new(Vec::new()),
    });
    token.inner.mint(&addr(ALICE), FUNDING).unwrap();
    token.inner.approve(&addr(ALICE), &addr(ESCROW), u128::MAX);

    let clock = Arc::new(ManualClock::new(START));
    let access = AccessControl::new(addr(OWNER), addr(CREATOR), addr(RESOLVER), addr(TREASURY)).unwrap();
    let escrow = CollateralEscrow::new(token.clone(), addr(ESCROW));
    let ledger = Arc::new(MarketLedger::new(access, escrow, clock, LedgerSettings::default()).unwrap());
    token.ledger.set(Arc::downgrade(&ledger)).ok();

    let market_id = ledger
        .create_market(
            &addr(CREATOR),
            MarketParams {
                question_uri: "ipfs://q".to_string(),
                oracle_uri: "ipfs://o".to_string(),
                open_epoch: START,
                close_epoch: START + DAY,
                fee_bps: 0,
            },
        )
        .unwrap();
    let order_id = ledger
        .submit_order(&addr(ALICE), OrderRequest::new(market_id, Outcome::Yes, 500_000, 10))
        .unwrap();

    assert_eq!(*token.observed.lock().unwrap(), vec![Err(LedgerError::ReentrantCall)]);
    assert_eq!(*token.reads.lock().unwrap(), vec![true]);
    // the outer call still committed
    assert!(ledger.get_order(order_id).unwrap().active);
    assert_eq!(token.inner.balance_of(&addr(ESCROW)), 5);
}

// ============================================================================
// FAILING COLLATERAL
// ============================================================================

#[test]
fn test_insufficient_allowance_aborts_fill() {
    let h = Harness::new();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 100);
    h.token.approve(&addr(BOB), &addr(ESCROW), 10);

    assert!(matches!(
        h.ledger.fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 100)),
        Err(LedgerError::TransferFailed { .. })
    ));
    assert_eq!(h.ledger.get_order(order_id).unwrap().filled, 0);
    assert_eq!(h.ledger.position_of(market_id, &addr(ALICE)).yes, 0);
    assert_eq!(h.ledger.get_market(market_id).unwrap().market.total_collateral, 0);
}

/// Rejects outgoing transfers to one address while blocking is switched on
struct BlockingToken {
    inner: Arc<InMemoryToken>,
    blocked: Mutex<Option<Address>>,
}

impl BlockingToken {
    fn harness() -> (Harness, Arc<BlockingToken>) {
        let inner = Arc::new(InMemoryToken::new("usdc"));
        let token = Arc::new(BlockingToken {
            inner: inner.clone(),
            blocked: Mutex::new(None),
        });
        (Harness::with_collateral(inner, token.clone()), token)
    }

    fn block(&self, who: Option<&str>) {
        *self.blocked.lock().unwrap() = who.map(addr);
    }
}

impl CollateralToken for BlockingToken {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        if self.blocked.lock().unwrap().as_ref() == Some(to) {
            return Err(TokenError::Rejected(format!("{to} cannot receive")));
        }
        self.inner.transfer(sender, to, amount)
    }

    fn transfer_from(&self, spender: &Address, from: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        self.inner.transfer_from(spender, from, to, amount)
    }

    fn reverse_transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        self.inner.reverse_transfer(sender, to, amount)
    }

    fn balance_of(&self, owner: &Address) -> u128 {
        self.inner.balance_of(owner)
    }
}

#[test]
fn test_rejected_fee_transfer_pays_nothing_and_claim_stays_open() {
    let (h, token) = BlockingToken::harness();
    let market_id = h.create_market(500);
    let order_id = h.submit(ALICE, market_id, Outcome::Yes, 500_000, 100_000_000);
    h.ledger
        .fill_order(&addr(BOB), order_id, FillRequest::new(500_000, 100_000_000))
        .unwrap();
    h.settle(market_id, Outcome::Yes);
    let alice_before = h.balance(ALICE);
    let events_before = h.log.since(0).len();

    token.block(Some(TREASURY));
    for _ in 0..2 {
        let err = h
            .ledger
            .claim_payout(&addr(ALICE), market_id, Outcome::Yes, None)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TransferFailed { ref to, amount: 5_000_000, .. } if *to == addr(TREASURY)
        ));
        assert_eq!(h.balance(ALICE), alice_before);
        assert_eq!(h.balance(TREASURY), 0);
        assert_eq!(h.balance(ESCROW), 100_000_000);
        assert!(!h.ledger.has_claimed(market_id, &addr(ALICE)));
        assert_eq!(h.ledger.position_of(market_id, &addr(ALICE)).yes, 100_000_000);
        assert_eq!(h.log.since(0).len(), events_before);
    }

    token.block(None);
    let claim = h.ledger.claim_payout(&addr(ALICE), market_id, Outcome::Yes, None).unwrap();
    assert_eq!(claim.payout, 95_000_000);
    assert_eq!(h.balance(ALICE), alice_before + 95_000_000);
    assert_eq!(h.balance(TREASURY), 5_000_000);
    assert_eq!(h.balance(ESCROW), 0);
}

#[test]
fn test_rejected_refund_keeps_order_resting() {
    let (h, token) = BlockingToken::harness();
    let market_id = h.create_market(0);
    let order_id = h.submit(ALICE, market_id, Outcome::No, 400_000, 1_000);
    assert_eq!(h.balance(ESCROW), 600);

    token.block(Some(ALICE));
    assert!(matches!(
        h.ledger.cancel_order(&addr(ALICE), order_id),
        Err(LedgerError::TransferFailed { .. })
    ));
    let order = h.ledger.get_order(order_id).unwrap();
    assert!(order.active);
    assert_eq!(order.filled, 0);
    assert_eq!(h.balance(ALICE), FUNDING - 600);
    assert_eq!(h.balance(ESCROW), 600);

    token.block(None);
    assert_eq!(h.ledger.cancel_order(&addr(ALICE), order_id).unwrap(), 600);
    assert_eq!(h.balance(ALICE), FUNDING);
}

#[test]
fn test_rejected_bond_refund_blocks_finalize() {
    let (h, token) = BlockingToken::harness();
    let market_id = h.create_market(0);
    h.clock.set(START + DAY);
    h.resolve(market_id, Outcome::Yes).unwrap();
    h.ledger.dispute_market(&addr(CAROL), market_id, "ipfs://counter-evidence").unwrap();
    h.clock.advance(DAY);

    token.block(Some(CAROL));
    assert!(matches!(
        h.ledger.finalize_market(&addr(OWNER), market_id),
        Err(LedgerError::TransferFailed { .. })
    ));
    assert_eq!(h.ledger.get_market(market_id).unwrap().market.status, MarketStatus::Disputed);
    assert!(h.ledger.get_dispute(market_id).unwrap().is_some());
    assert_eq!(h.balance(ESCROW), BOND);
    assert_eq!(h.balance(CAROL), FUNDING - BOND);

    token.block(None);
    assert_eq!(h.ledger.finalize_market(&addr(OWNER), market_id).unwrap(), Outcome::Yes);
    assert_eq!(h.balance(CAROL), FUNDING);
    assert_eq!(h.balance(ESCROW), 0);
}
