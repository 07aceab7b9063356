//! Process configuration for `ledgerd`, read from the environment (and a
//! `.env` file when present).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::ledger::{LedgerSettings, DEFAULT_DISPUTE_BOND, DEFAULT_DISPUTE_WINDOW_SECS};
use crate::types::Address;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:1234";
pub const DEFAULT_ESCROW_ADDRESS: &str = "ledger-escrow";
pub const DEFAULT_TOKEN_ADDRESS: &str = "usdc";
pub const DEFAULT_STATE_PATH: &str = "data/ledger_state.json";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub bind_addr: SocketAddr,
    pub owner: Address,
    pub creation_agent: Address,
    pub resolution_agent: Address,
    pub fee_recipient: Address,
    pub escrow_address: Address,
    pub token_address: Address,
    pub dispute_window_secs: u64,
    pub dispute_bond: u128,
    pub trader_approval_required: bool,
    pub state_path: PathBuf,
    /// Exposes `/token/mint`
    pub dev_faucet: bool,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let owner = get("LEDGER_OWNER")
            .map(Address::new)
            .ok_or(ConfigError::Missing("LEDGER_OWNER"))?;
        let address_or = |key: &'static str, default: &Address| get(key).map(Address::new).unwrap_or_else(|| default.clone());

        Ok(Self {
            bind_addr: parse(&get, "LEDGER_BIND_ADDR", DEFAULT_BIND_ADDR)?,
            creation_agent: address_or("LEDGER_CREATION_AGENT", &owner),
            resolution_agent: address_or("LEDGER_RESOLUTION_AGENT", &owner),
            fee_recipient: address_or("LEDGER_FEE_RECIPIENT", &owner),
            escrow_address: address_or("LEDGER_ESCROW_ADDRESS", &Address::new(DEFAULT_ESCROW_ADDRESS)),
            token_address: address_or("LEDGER_TOKEN_ADDRESS", &Address::new(DEFAULT_TOKEN_ADDRESS)),
            dispute_window_secs: parse(&get, "LEDGER_DISPUTE_WINDOW_SECS", &DEFAULT_DISPUTE_WINDOW_SECS.to_string())?,
            dispute_bond: parse(&get, "LEDGER_DISPUTE_BOND", &DEFAULT_DISPUTE_BOND.to_string())?,
            trader_approval_required: parse_flag(&get, "LEDGER_TRADER_APPROVAL_REQUIRED")?,
            state_path: get("LEDGER_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            dev_faucet: parse_flag(&get, "LEDGER_DEV_FAUCET")?,
            owner,
        })
    }

    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            dispute_window: self.dispute_window_secs,
            dispute_bond: self.dispute_bond,
        }
    }
}

fn parse<T>(get: &impl Fn(&'static str) -> Option<String>, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = get(key).unwrap_or_else(|| default.to_string());
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_flag(get: &impl Fn(&'static str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
