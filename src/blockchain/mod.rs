// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain-side primitives used by the gateway client.
//!
//! This module provides:
//! - Network/environment selection
//! - The signing identity (challenge, message and transfer signatures)
//! - Transfer sizing and fund-return tolerances

pub mod signing;
pub mod transactions;
pub mod types;

pub use signing::{Identity, LegacyTransfer, SignedTransfer};
pub use transactions::{GasEstimate, ReturnTolerance};
pub use types::*;
