// ============================================================================
// Collateral Token - external fungible-token interface
// ============================================================================
//
// The ledger only relies on `transfer`, `transfer_from` and `balance_of`
// succeeding or failing, plus `reverse_transfer` to take back a payout
// when a later payout in the same call fails. `InMemoryToken` is the in-process implementation
// used by the `ledgerd` binary and by tests.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::Address;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("balance {available} below {requested}")]
    InsufficientBalance { available: u128, requested: u128 },

    #[error("allowance {allowance} below {requested}")]
    InsufficientAllowance { allowance: u128, requested: u128 },

    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("balance of {holder} would overflow")]
    Overflow { holder: Address },
}

/// Standard fungible-token surface the escrow talks to
pub trait CollateralToken: Send + Sync {
    /// Address the token is registered under
    fn address(&self) -> Address;

    /// Move `amount` from `sender`'s own balance to `to`
    fn transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError>;

    /// Move `amount` from `from` to `to` against `spender`'s allowance
    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), TokenError>;

    /// Undo a `transfer` of `amount` from `sender` to `to` made earlier in
    /// the same ledger call
    fn reverse_transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError>;

    fn balance_of(&self, owner: &Address) -> u128;
}

// ============================================================================
// IN-MEMORY TOKEN
// ============================================================================

/// Balances and allowances of an in-memory token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBook {
    pub balances: HashMap<Address, u128>,
    /// owner -> spender -> allowance
    pub allowances: HashMap<Address, HashMap<Address, u128>>,
}

#[derive(Debug)]
pub struct InMemoryToken {
    address: Address,
    book: Mutex<TokenBook>,
}

impl InMemoryToken {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            book: Mutex::new(TokenBook::default()),
        }
    }

    pub fn from_book(address: impl Into<Address>, book: TokenBook) -> Self {
        Self {
            address: address.into(),
            book: Mutex::new(book),
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, TokenBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Credit new units to `to`
    pub fn mint(&self, to: &Address, amount: u128) -> Result<u128, TokenError> {
        let mut book = self.book();
        credit(&mut book, to, amount)
    }

    pub fn approve(&self, owner: &Address, spender: &Address, amount: u128) {
        let mut book = self.book();
        book.allowances
            .entry(owner.clone())
            .or_default()
            .insert(spender.clone(), amount);
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.book()
            .allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> TokenBook {
        self.book().clone()
    }
}

fn move_balance(book: &mut TokenBook, from: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
    let available = book.balances.get(from).copied().unwrap_or(0);
    if available < amount {
        return Err(TokenError::InsufficientBalance { available, requested: amount });
    }
    if from == to {
        return Ok(());
    }
    let received = book.balances.get(to).copied().unwrap_or(0);
    let credited = received
        .checked_add(amount)
        .ok_or_else(|| TokenError::Overflow { holder: to.clone() })?;
    book.balances.insert(from.clone(), available - amount);
    book.balances.insert(to.clone(), credited);
    Ok(())
}

fn credit(book: &mut TokenBook, to: &Address, amount: u128) -> Result<u128, TokenError> {
    let balance = book.balances.entry(to.clone()).or_insert(0);
    *balance = balance
        .checked_add(amount)
        .ok_or_else(|| TokenError::Overflow { holder: to.clone() })?;
    Ok(*balance)
}

impl CollateralToken for InMemoryToken {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        let mut book = self.book();
        move_balance(&mut book, sender, to, amount)
    }

    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), TokenError> {
        let mut book = self.book();
        let allowance = book
            .allowances
            .get(from)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0);
        if allowance < amount {
            return Err(TokenError::InsufficientAllowance { allowance, requested: amount });
        }
        move_balance(&mut book, from, to, amount)?;
        if let Some(m) = book.allowances.get_mut(from) {
            m.insert(spender.clone(), allowance - amount);
        }
        Ok(())
    }

    fn reverse_transfer(&self, sender: &Address, to: &Address, amount: u128) -> Result<(), TokenError> {
        let mut book = self.book();
        move_balance(&mut book, to, sender, amount)
    }

    fn balance_of(&self, owner: &Address) -> u128 {
        self.book().balances.get(owner).copied().unwrap_or(0)
    }
}
