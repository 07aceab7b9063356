// ============================================================================
// Collateral Escrow - Collateral Market Ledger
// ============================================================================
//
// Computes the stake each side of a position must lock and moves collateral
// between traders and the escrow account through the external token.
//
// Stake:
//   YES at price p for q shares  -> p * q / SCALE
//   NO  at price p for q shares  -> (SCALE - p) * q / SCALE
//
// Both stakes floor. A matched pair can therefore lock one unit
// less than the shares it creates; that dust is not reconciled.
//
// ============================================================================

pub mod token;

pub use token::*;

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{Address, Outcome, PRICE_SCALE};

/// Collateral required to hold `position` at `price` for `quantity` shares
pub fn stake_for(position: Outcome, price: u128, quantity: u128) -> LedgerResult<u128> {
    let per_share = match position {
        Outcome::Yes => price,
        Outcome::No => PRICE_SCALE
            .checked_sub(price)
            .ok_or(LedgerError::InvalidPrice { price })?,
        Outcome::Undefined => return Err(LedgerError::InvalidPosition { position }),
    };
    per_share
        .checked_mul(quantity)
        .map(|v| v / PRICE_SCALE)
        .ok_or(LedgerError::Overflow { what: "stake" })
}

// ============================================================================
// TRANSFER PLAN
// ============================================================================

/// Collateral movements a single call performs, executed after validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    pulls: Vec<(Address, u128)>,
    payouts: Vec<(Address, u128)>,
}

impl TransferPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull `amount` from `payer` into escrow. Zero amounts are dropped.
    pub fn pull(&mut self, payer: &Address, amount: u128) {
        if amount > 0 {
            self.pulls.push((payer.clone(), amount));
        }
    }

    /// Pay `amount` out of escrow to `to`. Zero amounts are dropped.
    pub fn pay(&mut self, to: &Address, amount: u128) {
        if amount > 0 {
            self.payouts.push((to.clone(), amount));
        }
    }

    pub fn total_out(&self) -> u128 {
        self.payouts.iter().map(|(_, a)| *a).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pulls.is_empty() && self.payouts.is_empty()
    }
}

// ============================================================================
// ESCROW
// ============================================================================

/// Escrow account bound to the current payment token
#[derive(Clone)]
pub struct CollateralEscrow {
    token: Arc<dyn CollateralToken>,
    account: Address,
}

impl std::fmt::Debug for CollateralEscrow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollateralEscrow")
            .field("token", &self.token.address())
            .field("account", &self.account)
            .finish()
    }
}

impl CollateralEscrow {
    pub fn new(token: Arc<dyn CollateralToken>, account: Address) -> Self {
        Self { token, account }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn token_address(&self) -> Address {
        self.token.address()
    }

    pub fn balance(&self) -> u128 {
        self.token.balance_of(&self.account)
    }

    /// Execute a plan all-or-nothing.
    ///
    /// Pulls run first; a failed pull returns the earlier pulls to their
    /// payers. Payouts only start once the escrow balance covers all of them,
    /// and a failed payout takes back the earlier payouts before the pulls
    /// are returned.
    pub fn execute(&self, plan: &TransferPlan) -> LedgerResult<()> {
        let mut pulled: Vec<&(Address, u128)> = Vec::with_capacity(plan.pulls.len());
        for entry in &plan.pulls {
            let (payer, amount) = entry;
            if let Err(e) = self.token.transfer_from(&self.account, payer, &self.account, *amount) {
                self.unwind(&pulled);
                return Err(LedgerError::TransferFailed {
                    from: payer.clone(),
                    to: self.account.clone(),
                    amount: *amount,
                    reason: e.to_string(),
                });
            }
            debug!(payer = %payer, amount = *amount, "collateral pulled into escrow");
            pulled.push(entry);
        }

        let required = plan.total_out();
        if required > 0 {
            let available = self.balance();
            if available < required {
                self.unwind(&pulled);
                return Err(LedgerError::InsufficientEscrow { required, available });
            }
        }

        let mut paid: Vec<&(Address, u128)> = Vec::with_capacity(plan.payouts.len());
        for entry in &plan.payouts {
            let (to, amount) = entry;
            if let Err(e) = self.token.transfer(&self.account, to, *amount) {
                self.claw_back(&paid);
                self.unwind(&pulled);
                return Err(LedgerError::TransferFailed {
                    from: self.account.clone(),
                    to: to.clone(),
                    amount: *amount,
                    reason: e.to_string(),
                });
            }
            debug!(to = %to, amount = *amount, "collateral paid out of escrow");
            paid.push(entry);
        }
        Ok(())
    }

    fn claw_back(&self, paid: &[&(Address, u128)]) {
        for (to, amount) in paid.iter().rev().map(|e| (&e.0, e.1)) {
            if let Err(e) = self.token.reverse_transfer(&self.account, to, amount) {
                error!(to = %to, amount, error = %e, "failed to take back payout");
            }
        }
    }

    fn unwind(&self, pulled: &[&(Address, u128)]) {
        for (payer, amount) in pulled.iter().rev().map(|e| (&e.0, e.1)) {
            if let Err(e) = self.token.transfer(&self.account, payer, amount) {
                warn!(payer = %payer, amount, error = %e, "failed to return pulled collateral");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
