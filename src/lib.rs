// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway Harness - Session Key Lifecycle Client & Scenarios
//!
//! Client library for a remote Gateway that custodies session keys: the
//! challenge/response handshake, session key management and the polling
//! that watches funds arrive at and return from those keys. Scenario
//! drivers exercise a deployment end to end; an in-memory simulator stands
//! in for the gateway locally and in tests.
//!
//! ## Modules
//!
//! - `blockchain` - Identities, transfer signing and sizing
//! - `gateway` - Transport, handshake, JSON-RPC and session keys
//! - `monitor` - Cancellable fund arrival / expiration / receipt waits
//! - `scenarios` - End-to-end scenario drivers
//! - `simulator` - In-memory gateway (Axum)

pub mod blockchain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod monitor;
pub mod scenarios;
pub mod simulator;

pub use error::GatewayError;
