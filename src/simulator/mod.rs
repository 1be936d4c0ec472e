// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Gateway Simulator
//!
//! An in-memory gateway speaking the same wire contract as the hosted
//! deployments. It backs the LOCAL environment (`gateway-harness simulate`)
//! and every network-level test in this crate.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /v1/join/` | issue a single-use challenge token |
//! | `POST /v1/authenticate/?token=` | verify the EIP-712 challenge signature |
//! | `POST /v1/?token=` | JSON-RPC (`eth_*`, `sessionkeys_*`) |
//!
//! Session keys expire lazily on the next request after their lifetime
//! elapses; expiry and deletion both return the key's balance to the owner
//! less one transfer fee.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::blockchain::{NetworkConfig, LOCAL_CHAIN_ID};

mod error;
mod handlers;
mod state;

pub use state::SimState;

/// Reads sweep expired keys too, so every access takes the lock exclusively.
pub type SharedState = Arc<Mutex<SimState>>;

/// Maximum time `shutdown` waits for open connections to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    pub chain_id: u64,
    /// Gas price in wei; every transfer is charged 21000 gas at this price.
    pub gas_price: u128,
    /// Balance credited to an account on its first successful authentication.
    pub auto_fund: Option<U256>,
    /// Lifetime applied to session keys created without `expirySeconds`.
    pub default_key_expiry: Option<Duration>,
    /// Maximum `join` requests served per second.
    pub join_rate_limit: Option<u32>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            gas_price: GWEI,
            auto_fund: None,
            default_key_expiry: None,
            join_rate_limit: None,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/join/", get(handlers::join))
        .route("/v1/authenticate/", post(handlers::authenticate))
        .route("/v1/", post(handlers::rpc))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running simulator bound to a local TCP port.
pub struct Simulator {
    addr: SocketAddr,
    config: SimulatorConfig,
    state: SharedState,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl Simulator {
    /// Start on an ephemeral loopback port.
    pub async fn spawn(config: SimulatorConfig) -> std::io::Result<Self> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), config).await
    }

    pub async fn bind(addr: SocketAddr, config: SimulatorConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let state: SharedState = Arc::new(Mutex::new(SimState::new(config.clone())));
        let shutdown = CancellationToken::new();
        let app = router(state.clone());

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!(
            addr = %addr,
            chain_id = config.chain_id,
            "Gateway simulator listening"
        );
        Ok(Self {
            addr,
            config,
            state,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Network configuration pointing at this simulator.
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig::custom("simulator", self.base_url(), self.config.chain_id)
    }

    /// Mint `amount` wei into `address`.
    pub async fn credit(&self, address: Address, amount: U256) {
        self.state.lock().await.credit(address, amount);
    }

    pub async fn balance(&self, address: Address) -> U256 {
        self.state.lock().await.balance(address)
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting requests and wait for the server task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.task).await {
            Ok(Ok(Ok(()))) => info!(addr = %self.addr, "Gateway simulator stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "Gateway simulator exited with error"),
            Ok(Err(e)) => warn!(error = %e, "Gateway simulator task failed"),
            Err(_) => warn!("Gateway simulator did not drain connections in time"),
        }
    }
}
