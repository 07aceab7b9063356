// HTTP request handlers for the ledgerd API
//
// The caller of every mutating route is taken from the `x-ledger-caller`
// header. Responses are `{ "success": true, "data": ... }` or
// `{ "success": false, "error": ..., "kind": ... }`.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app_state::SharedState;
use crate::error::{ErrorKind, LedgerError};
use crate::escrow::{CollateralToken, TokenError};
use crate::market::{MarketParams, Resolution};
use crate::orderbook::{FillRequest, OrderRequest};
use crate::types::{Address, MarketId, OrderId, Outcome};

pub const CALLER_HEADER: &str = "x-ledger-caller";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("missing x-ledger-caller header")]
    MissingCaller,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::MissingCaller => (StatusCode::UNAUTHORIZED, "authentication"),
            ApiError::Token(_) => (StatusCode::UNPROCESSABLE_ENTITY, "economic"),
            ApiError::Ledger(e) => {
                let status = match e.kind() {
                    ErrorKind::Authorization => StatusCode::FORBIDDEN,
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::State if e.is_not_found() => StatusCode::NOT_FOUND,
                    ErrorKind::State => StatusCode::CONFLICT,
                    ErrorKind::Economic => StatusCode::UNPROCESSABLE_ENTITY,
                };
                let kind = match e.kind() {
                    ErrorKind::Authorization => "authorization",
                    ErrorKind::Validation => "validation",
                    ErrorKind::State => "state",
                    ErrorKind::Economic => "economic",
                };
                (status, kind)
            }
        };
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "kind": kind,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse { success: true, data }))
}

// ============================================================================
// CALLER
// ============================================================================

/// Address named by the `x-ledger-caller` header
#[derive(Debug, Clone)]
pub struct Caller(pub Address);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(Address::new(v)))
            .ok_or(ApiError::MissingCaller)
    }
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DisputeBody {
    pub evidence_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimBody {
    pub position: Outcome,
    #[serde(default)]
    pub recipient: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub struct AddressBody {
    pub address: Address,
}

#[derive(Debug, Deserialize)]
pub struct RequiredBody {
    pub required: bool,
}

#[derive(Debug, Deserialize)]
pub struct TraderApprovalBody {
    pub trader: Address,
    pub approved: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    /// Defaults to the escrow account
    #[serde(default)]
    pub spender: Option<Address>,
    pub amount: u128,
}

#[derive(Debug, Deserialize)]
pub struct MintBody {
    pub to: Address,
    pub amount: u128,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: SharedState) -> Router {
    let mut app = Router::new()
        // ===== HEALTH =====
        .route("/health", get(health_check))
        // ===== MARKETS =====
        .route("/markets", get(list_markets).post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/dispute", get(get_dispute).post(dispute_market))
        .route("/markets/:id/resolve", post(resolve_market))
        .route("/markets/:id/finalize", post(finalize_market))
        .route("/markets/:id/claim", post(claim_payout))
        .route("/markets/:id/positions/:trader", get(get_position))
        // ===== ORDERS =====
        .route("/orders", post(submit_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/fill", post(fill_order))
        .route("/owners/:owner/orders", get(get_orders_by_owner))
        // ===== EVENTS =====
        .route("/events", get(get_events))
        // ===== ADMIN =====
        .route("/admin/payment-token", post(set_payment_token))
        .route("/admin/creation-agent", post(set_creation_agent))
        .route("/admin/resolution-agent", post(set_resolution_agent))
        .route("/admin/fee-recipient", post(set_fee_recipient))
        .route("/admin/approval-authority", post(set_approval_authority))
        .route("/admin/approval-required", post(set_approval_required))
        .route("/admin/trader-approval", post(set_trader_approval))
        .route("/admin/owner", post(transfer_ownership))
        // ===== COLLATERAL TOKEN =====
        .route("/token/approve", post(token_approve))
        .route("/token/balance/:address", get(token_balance));

    if state.dev_faucet {
        app = app.route("/token/mint", post(token_mint));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn health_check(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "collateral-market-ledger",
        "now": state.ledger.now(),
        "markets": state.ledger.list_markets().len(),
        "payment_token": state.ledger.payment_token(),
        "escrow": state.ledger.escrow_account(),
    }))
}

// ===== MARKETS =====

pub async fn list_markets(State(state): State<SharedState>) -> ApiResult<impl Serialize> {
    ok(state.ledger.list_markets())
}

pub async fn create_market(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(params): Json<MarketParams>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    let market_id = state.ledger.create_market(&caller, params)?;
    ok(json!({ "market_id": market_id }))
}

pub async fn get_market(State(state): State<SharedState>, Path(id): Path<u64>) -> ApiResult<impl Serialize> {
    ok(state.ledger.get_market(MarketId(id))?)
}

pub async fn get_dispute(State(state): State<SharedState>, Path(id): Path<u64>) -> ApiResult<impl Serialize> {
    ok(state.ledger.get_dispute(MarketId(id))?)
}

pub async fn resolve_market(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<u64>,
    Json(resolution): Json<Resolution>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    let resolved_at = state.ledger.resolve_market(&caller, MarketId(id), resolution)?;
    ok(json!({ "market_id": id, "resolved_at": resolved_at }))
}

pub async fn dispute_market(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<u64>,
    Json(body): Json<DisputeBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.dispute_market(&caller, MarketId(id), &body.evidence_uri)?;
    ok(state.ledger.get_dispute(MarketId(id))?)
}

pub async fn finalize_market(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<u64>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    let outcome = state.ledger.finalize_market(&caller, MarketId(id))?;
    ok(json!({ "market_id": id, "outcome": outcome }))
}

pub async fn claim_payout(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<u64>,
    Json(body): Json<ClaimBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    ok(state.ledger.claim_payout(&caller, MarketId(id), body.position, body.recipient)?)
}

#[derive(Debug, Serialize)]
pub struct PositionView {
    pub market_id: MarketId,
    pub trader: Address,
    pub yes: u128,
    pub no: u128,
    pub claimed: bool,
}

pub async fn get_position(
    State(state): State<SharedState>,
    Path((id, trader)): Path<(u64, String)>,
) -> ApiResult<impl Serialize> {
    let market_id = MarketId(id);
    state.ledger.get_market(market_id)?;
    let trader = Address::new(trader);
    let balance = state.ledger.position_of(market_id, &trader);
    ok(PositionView {
        market_id,
        claimed: state.ledger.has_claimed(market_id, &trader),
        trader,
        yes: balance.yes,
        no: balance.no,
    })
}

// ===== ORDERS =====

pub async fn submit_order(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(request): Json<OrderRequest>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    let order_id = state.ledger.submit_order(&caller, request)?;
    ok(state.ledger.get_order(order_id)?)
}

pub async fn get_order(State(state): State<SharedState>, Path(id): Path<u64>) -> ApiResult<impl Serialize> {
    ok(state.ledger.get_order(OrderId(id))?)
}

#[derive(Debug, Serialize)]
pub struct CancelView {
    pub order_id: OrderId,
    pub refund: u128,
}

pub async fn cancel_order(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<u64>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    let refund = state.ledger.cancel_order(&caller, OrderId(id))?;
    ok(CancelView { order_id: OrderId(id), refund })
}

pub async fn fill_order(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<u64>,
    Json(fill): Json<FillRequest>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    ok(state.ledger.fill_order(&caller, OrderId(id), fill)?)
}

pub async fn get_orders_by_owner(
    State(state): State<SharedState>,
    Path(owner): Path<String>,
) -> ApiResult<impl Serialize> {
    ok(state.ledger.get_orders_by_owner(&Address::new(owner)))
}

// ===== EVENTS =====

pub async fn get_events(State(state): State<SharedState>, Query(query): Query<EventsQuery>) -> ApiResult<impl Serialize> {
    ok(state.events.since(query.since))
}

// ===== ADMIN =====

pub async fn set_payment_token(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<AddressBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    let token = state.tokens.get_or_create(&body.address);
    state.ledger.set_payment_token(&caller, token)?;
    ok(json!({ "payment_token": state.ledger.payment_token() }))
}

pub async fn set_creation_agent(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<AddressBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.set_creation_agent(&caller, body.address)?;
    ok(state.ledger.access())
}

pub async fn set_resolution_agent(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<AddressBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.set_resolution_agent(&caller, body.address)?;
    ok(state.ledger.access())
}

pub async fn set_fee_recipient(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<AddressBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.set_fee_recipient(&caller, body.address)?;
    ok(state.ledger.access())
}

pub async fn set_approval_authority(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<AddressBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.set_approval_authority(&caller, body.address)?;
    ok(state.ledger.access())
}

pub async fn set_approval_required(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<RequiredBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.set_trader_approval_required(&caller, body.required)?;
    ok(state.ledger.access())
}

pub async fn set_trader_approval(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<TraderApprovalBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.set_trader_approval(&caller, body.trader.clone(), body.approved)?;
    ok(json!({
        "trader": body.trader,
        "approved": state.ledger.is_trader_approved(&body.trader),
    }))
}

pub async fn transfer_ownership(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<AddressBody>,
) -> ApiResult<impl Serialize> {
    let _call = state.call_lock.lock().await;
    state.ledger.transfer_ownership(&caller, body.address)?;
    ok(state.ledger.access())
}

// ===== COLLATERAL TOKEN =====

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub token: Address,
    pub address: Address,
    pub balance: u128,
    /// Allowance granted to the escrow account
    pub escrow_allowance: u128,
}

fn balance_view(state: &SharedState, address: Address) -> BalanceView {
    let token = state.payment_token();
    BalanceView {
        token: token.address(),
        balance: token.balance_of(&address),
        escrow_allowance: token.allowance(&address, &state.ledger.escrow_account()),
        address,
    }
}

pub async fn token_approve(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<ApproveBody>,
) -> ApiResult<impl Serialize> {
    let spender = body.spender.unwrap_or_else(|| state.ledger.escrow_account());
    state.payment_token().approve(&caller, &spender, body.amount);
    ok(balance_view(&state, caller))
}

pub async fn token_balance(State(state): State<SharedState>, Path(address): Path<String>) -> ApiResult<impl Serialize> {
    ok(balance_view(&state, Address::new(address)))
}

/// Dev faucet, owner only
pub async fn token_mint(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<MintBody>,
) -> ApiResult<impl Serialize> {
    state.ledger.access().require_owner(&caller)?;
    state.payment_token().mint(&body.to, body.amount)?;
    ok(balance_view(&state, body.to))
}
