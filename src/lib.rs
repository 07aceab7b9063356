/// Collateralized binary-outcome market ledger
///
/// Markets, escrow-backed resting orders, peer-to-peer fills, a
/// resolution / dispute / finalization lifecycle and fee-netted payouts.
/// Exports all modules for use as a library crate; `ledgerd` serves them
/// over HTTP.

pub mod access;
pub mod app_state;
pub mod clock;
pub mod config;
pub mod error;
pub mod escrow;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod market;
pub mod orderbook;
pub mod payout;
pub mod shares;
pub mod types;

pub use access::AccessControl;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LedgerConfig};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use escrow::{stake_for, CollateralEscrow, CollateralToken, InMemoryToken, TokenBook, TokenError, TransferPlan};
pub use events::{EventLog, EventRecord, EventSink, LedgerEvent, TracingSink};
pub use ledger::{LedgerSettings, LedgerState, MarketLedger};
pub use market::{Dispute, Market, MarketParams, MarketSnapshot, Resolution};
pub use orderbook::{FillReceipt, FillRequest, Order, OrderRequest};
pub use payout::{fee_of, ClaimAmounts};
pub use shares::ShareBalance;
pub use types::{Address, MarketId, MarketStatus, OrderId, OrderType, Outcome, MAX_FEE_BPS, PRICE_SCALE};
