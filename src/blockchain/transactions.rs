// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer sizing and fund-return tolerances.
//!
//! The gateway deducts fees when it returns session-key funds to the owner,
//! and the exact deduction is part of its contract rather than something the
//! client can observe. Checks are therefore expressed as basis-point
//! tolerances which scenarios can tighten once the fee rules are confirmed.

use alloy::primitives::U256;

use super::types::TRANSFER_GAS;

const BPS_DENOMINATOR: u64 = 10_000;

/// Gas estimation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    /// Estimated gas limit
    pub gas_limit: u64,
    /// Gas price in wei
    pub gas_price: u128,
}

impl GasEstimate {
    /// Default estimate for a plain transfer at `gas_price`.
    pub fn transfer(gas_price: u128) -> Self {
        Self {
            gas_limit: TRANSFER_GAS,
            gas_price,
        }
    }

    /// Total estimated cost in wei.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price)
    }
}

/// Amount to move from an owner account into a session key.
///
/// Sends 95 % of `balance`; when that would not leave enough for gas, sends
/// `balance - gas - 0.1 %` instead. Returns zero when nothing can be moved.
pub fn plan_transfer(balance: U256, gas: &GasEstimate) -> U256 {
    let cost = gas.cost();
    let preferred = balance * U256::from(95u64) / U256::from(100u64);

    if preferred.saturating_add(cost) <= balance {
        return preferred;
    }

    balance
        .saturating_sub(cost)
        .saturating_sub(balance / U256::from(1000u64))
}

/// Amount to send back out of an account holding `balance`.
///
/// Keeps gas plus a 0.1 % buffer; falls back to half the balance when the
/// buffer cannot be covered.
pub fn plan_return(balance: U256, gas: &GasEstimate) -> U256 {
    let amount = balance
        .saturating_sub(gas.cost())
        .saturating_sub(balance / U256::from(1000u64));

    if amount.is_zero() {
        balance / U256::from(2u64)
    } else {
        amount
    }
}

/// Tolerances applied when checking that funds came back to an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnTolerance {
    /// Minimum share of the sent amount that must be returned, in basis points.
    pub min_return_bps: u64,
    /// Residual balance allowed to remain on a cleared key, in basis points.
    pub residual_bps: u64,
}

impl ReturnTolerance {
    /// Return-on-delete check: 90 % back, 1 % residual.
    pub const ON_DELETE: Self = Self {
        min_return_bps: 9_000,
        residual_bps: 100,
    };

    /// Expiration stress check: 80 % back, 1 % residual.
    pub const ON_EXPIRY: Self = Self {
        min_return_bps: 8_000,
        residual_bps: 100,
    };

    /// Smallest return that satisfies the tolerance for `sent`.
    pub fn minimum_return(&self, sent: U256) -> U256 {
        sent * U256::from(self.min_return_bps) / U256::from(BPS_DENOMINATOR)
    }

    /// Largest residual a key may keep after returning `sent`.
    pub fn residual_allowance(&self, sent: U256) -> U256 {
        sent * U256::from(self.residual_bps) / U256::from(BPS_DENOMINATOR)
    }

    pub fn return_satisfied(&self, sent: U256, returned: U256) -> bool {
        returned >= self.minimum_return(sent)
    }

    pub fn residual_cleared(&self, sent: U256, residual: U256) -> bool {
        residual <= self.residual_allowance(sent)
    }
}

impl Default for ReturnTolerance {
    fn default() -> Self {
        Self::ON_DELETE
    }
}
