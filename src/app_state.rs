// Application state for the ledgerd HTTP server

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::info;

use crate::access::AccessControl;
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::escrow::{CollateralEscrow, InMemoryToken, TokenBook};
use crate::events::{EventLog, TracingSink};
use crate::ledger::{LedgerState, MarketLedger};
use crate::types::Address;

pub type SharedState = Arc<AppState>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// TOKEN REGISTRY
// ============================================================================

/// Development collateral tokens by address. Pointing the ledger at an
/// unknown token address creates an empty token there.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: RwLock<BTreeMap<Address, Arc<InMemoryToken>>>,
}

impl TokenRegistry {
    pub fn get_or_create(&self, address: &Address) -> Arc<InMemoryToken> {
        let mut tokens = self.tokens.write().unwrap_or_else(|p| p.into_inner());
        tokens
            .entry(address.clone())
            .or_insert_with(|| Arc::new(InMemoryToken::new(address.clone())))
            .clone()
    }

    pub fn books(&self) -> BTreeMap<Address, TokenBook> {
        self.tokens
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(address, token)| (address.clone(), token.snapshot()))
            .collect()
    }

    pub fn from_books(books: BTreeMap<Address, TokenBook>) -> Self {
        let tokens = books
            .into_iter()
            .map(|(address, book)| {
                let token = Arc::new(InMemoryToken::from_book(address.clone(), book));
                (address, token)
            })
            .collect();
        Self {
            tokens: RwLock::new(tokens),
        }
    }
}

/// What `save_to_disk` writes
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub ledger: LedgerState,
    pub tokens: BTreeMap<Address, TokenBook>,
}

// ============================================================================
// APP STATE
// ============================================================================

pub struct AppState {
    pub ledger: MarketLedger,
    pub tokens: TokenRegistry,
    pub events: Arc<EventLog>,

    /// Serializes mutating calls; the ledger itself rejects overlap
    pub call_lock: tokio::sync::Mutex<()>,

    pub dev_faucet: bool,
}

impl AppState {
    /// Fresh ledger from configuration
    pub fn new(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self, StateError> {
        let mut access = AccessControl::new(
            config.owner.clone(),
            config.creation_agent.clone(),
            config.resolution_agent.clone(),
            config.fee_recipient.clone(),
        )?;
        access.trader_approval_required = config.trader_approval_required;
        Self::assemble(config, clock, access, TokenRegistry::default(), &config.token_address)
    }

    /// Ledger and token balances saved by `save_to_disk`
    pub fn restore(config: &LedgerConfig, clock: Arc<dyn Clock>, saved: PersistedState) -> Result<Self, StateError> {
        let tokens = TokenRegistry::from_books(saved.tokens);
        let payment_token = saved.ledger.payment_token.clone();
        let state = Self::assemble(config, clock, saved.ledger.access.clone(), tokens, &payment_token)?;
        state.ledger.restore(saved.ledger)?;
        Ok(state)
    }

    /// Restore from `config.state_path` when it exists, else start fresh
    pub fn load_or_new(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self, StateError> {
        if !config.state_path.exists() {
            info!(path = %config.state_path.display(), "no persisted state, starting fresh");
            return Self::new(config, clock);
        }
        let raw = std::fs::read_to_string(&config.state_path)?;
        let saved: PersistedState = serde_json::from_str(&raw)?;
        info!(
            path = %config.state_path.display(),
            markets = saved.ledger.markets.markets.len(),
            orders = saved.ledger.orders.orders.len(),
            "loaded persisted state"
        );
        Self::restore(config, clock, saved)
    }

    fn assemble(
        config: &LedgerConfig,
        clock: Arc<dyn Clock>,
        access: AccessControl,
        tokens: TokenRegistry,
        payment_token: &Address,
    ) -> Result<Self, StateError> {
        let token = tokens.get_or_create(payment_token);
        let escrow = CollateralEscrow::new(token, config.escrow_address.clone());
        let events = Arc::new(EventLog::default());
        let ledger = MarketLedger::new(access, escrow, clock, config.settings())?
            .with_sink(Arc::new(TracingSink))
            .with_sink(events.clone());
        Ok(Self {
            ledger,
            tokens,
            events,
            call_lock: tokio::sync::Mutex::new(()),
            dev_faucet: config.dev_faucet,
        })
    }

    /// The token the escrow currently settles in
    pub fn payment_token(&self) -> Arc<InMemoryToken> {
        self.tokens.get_or_create(&self.ledger.payment_token())
    }

    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            ledger: self.ledger.snapshot(),
            tokens: self.tokens.books(),
        }
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<(), StateError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.persisted())?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "ledger state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::escrow::CollateralToken;
    use crate::market::MarketParams;
    use std::collections::HashMap;

    fn config(state_path: &Path) -> LedgerConfig {
        let vars: HashMap<&str, String> = [
            ("LEDGER_OWNER", "owner".to_string()),
            ("LEDGER_STATE_PATH", state_path.display().to_string()),
        ]
        .into_iter()
        .collect();
        LedgerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!("ledger-state-{}.json", std::process::id()));
        let config = config(&path);
        let clock = Arc::new(ManualClock::new(1_000));

        let state = AppState::new(&config, clock.clone()).unwrap();
        let owner = Address::from("owner");
        state.payment_token().mint(&owner, 42).unwrap();
        state
            .ledger
            .create_market(
                &owner,
                MarketParams {
                    question_uri: "ipfs://q".to_string(),
                    oracle_uri: "ipfs://o".to_string(),
                    open_epoch: 1_000,
                    close_epoch: 2_000,
                    fee_bps: 100,
                },
            )
            .unwrap();
        state.save_to_disk(&path).unwrap();

        let reloaded = AppState::load_or_new(&config, clock).unwrap();
        assert_eq!(reloaded.ledger.list_markets().len(), 1);
        assert_eq!(reloaded.payment_token().balance_of(&owner), 42);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_registry_creates_unknown_tokens() {
        let registry = TokenRegistry::default();
        let a = registry.get_or_create(&"dai".into());
        a.mint(&"alice".into(), 5).unwrap();
        let b = registry.get_or_create(&"dai".into());
        assert_eq!(b.balance_of(&"alice".into()), 5);
        assert_eq!(registry.books().len(), 1);
    }
}
