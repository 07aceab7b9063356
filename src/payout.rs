//! Payout computation for finalized markets.
//!
//! Each winning share pays one collateral unit. The market fee is taken out
//! of that at claim time (never at fill time):
//!
//! ```text
//! fee    = shares * fee_bps / 10_000   (floor)
//! payout = shares - fee
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::types::MAX_FEE_BPS;

/// `amount * fee_bps / 10_000`, floored
pub fn fee_of(amount: u128, fee_bps: u32) -> LedgerResult<u128> {
    amount
        .checked_mul(u128::from(fee_bps))
        .map(|v| v / u128::from(MAX_FEE_BPS))
        .ok_or(LedgerError::Overflow { what: "fee" })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAmounts {
    pub shares: u128,
    pub fee: u128,
    pub payout: u128,
}

impl ClaimAmounts {
    pub fn compute(shares: u128, fee_bps: u32) -> LedgerResult<Self> {
        let fee = fee_of(shares, fee_bps)?;
        Ok(Self {
            shares,
            fee,
            payout: shares - fee,
        })
    }
}
