// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway client.
//!
//! This module provides:
//! - The HTTP transport bound to one network
//! - The join/sign/authenticate handshake
//! - JSON-RPC chain and session-key calls
//! - Session key lifecycle management

pub mod client;
pub mod handshake;
pub mod rpc;
pub mod session_keys;
pub mod transport;

pub use client::GatewayClient;
pub use handshake::{Challenge, Handshake, HandshakeState, Session};
pub use rpc::RpcClient;
pub use session_keys::{
    SessionKey, SessionKeyConfig, SessionKeyManager, SessionKeyStatus, StatusTransition,
};
pub use transport::{GatewayResponse, GatewayTransport};
