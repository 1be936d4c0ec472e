// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Scenario tunables are plain values built by the CLI (or by tests) and
//! passed down explicitly. Only logging reads the process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,gateway_harness=info,tower_http=info` |

use std::time::Duration;

use alloy::primitives::Address;

use crate::blockchain::{Environment, NetworkConfig};
use crate::monitor::PollPolicy;

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,gateway_harness=info,tower_http=info";

/// Users created by the expiration stress scenario.
pub const DEFAULT_STRESS_USERS: usize = 5;

/// Session keys created per stress user.
pub const DEFAULT_KEYS_PER_USER: usize = 3;

/// How long the stress scenario waits for keys to expire.
pub const DEFAULT_EXPIRATION_WAIT: Duration = Duration::from_secs(600);

/// Where the stress scenario sweeps leftover funds.
pub const DEFAULT_RETURN_ADDRESS: Address =
    alloy::primitives::address!("10DeC2baF2944Ce99710B4319Ec7C7B619E70a0E");

/// Total `join` requests issued by the rate-limit probe.
pub const DEFAULT_JOIN_REQUESTS: usize = 5_000;

/// Concurrent requests in flight during the rate-limit probe.
pub const DEFAULT_JOIN_WORKERS: usize = 100;

/// Settings shared by every scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub network: NetworkConfig,
    /// Waiting for an operator (or faucet) to fund an account.
    pub funds: PollPolicy,
    /// Waiting for submitted transfers to be included.
    pub receipt: PollPolicy,
}

impl ScenarioConfig {
    pub fn new(network: NetworkConfig) -> Self {
        Self {
            network,
            funds: PollPolicy::ARRIVAL,
            receipt: PollPolicy::RECEIPT,
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::new(Environment::Local.network())
    }
}

/// Fan-out and expiry settings for the fund expiration stress scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressConfig {
    pub users: usize,
    pub keys_per_user: usize,
    /// Lifetime requested for each key; `None` leaves it to the gateway.
    pub key_expiry: Option<Duration>,
    /// Polling for every key's expiration. The timeout is the whole wait window.
    pub expiration: PollPolicy,
    /// Sweep destination for leftover funds; `None` skips the sweep.
    pub return_address: Option<Address>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            users: DEFAULT_STRESS_USERS,
            keys_per_user: DEFAULT_KEYS_PER_USER,
            key_expiry: None,
            expiration: PollPolicy::EXPIRATION.with_timeout(DEFAULT_EXPIRATION_WAIT),
            return_address: Some(DEFAULT_RETURN_ADDRESS),
        }
    }
}

impl StressConfig {
    pub fn total_keys(&self) -> usize {
        self.users * self.keys_per_user
    }
}

/// Load settings for the `join` rate-limit probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRateConfig {
    pub requests: usize,
    pub workers: usize,
    pub request_timeout: Duration,
}

impl Default for JoinRateConfig {
    fn default() -> Self {
        Self {
            requests: DEFAULT_JOIN_REQUESTS,
            workers: DEFAULT_JOIN_WORKERS,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_defaults_match_the_documented_run() {
        let config = StressConfig::default();
        assert_eq!(config.total_keys(), 15);
        assert_eq!(config.expiration.timeout, Duration::from_secs(600));
        assert_eq!(config.expiration.interval, Duration::from_secs(10));
        assert_eq!(
            config.return_address.map(|a| a.to_checksum(None)),
            Some("0x10DeC2baF2944Ce99710B4319Ec7C7B619E70a0E".to_string())
        );
    }

    #[test]
    fn scenario_defaults_target_local() {
        let config = ScenarioConfig::default();
        assert_eq!(config.network, Environment::Local.network());
        assert_eq!(config.funds, PollPolicy::ARRIVAL);
    }
}
