// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Network selection and transfer receipts.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};

/// Gateway network configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// Chain ID used for EIP-712 domains and EIP-155 signatures
    pub chain_id: u64,
    /// Gateway base URL (including the `/v1` prefix)
    pub base_url: String,
}

impl NetworkConfig {
    /// Build a configuration pointing at an arbitrary gateway.
    pub fn custom(name: &'static str, base_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name,
            chain_id,
            base_url: base_url.into(),
        }
    }

    /// Replace the base URL, keeping name and chain ID.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Gateway deployments the harness knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Sepolia,
    Dexynth,
    Uat,
    Local,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Sepolia,
        Environment::Dexynth,
        Environment::Uat,
        Environment::Local,
    ];

    /// Immutable network configuration for this environment.
    pub fn network(self) -> NetworkConfig {
        match self {
            Environment::Sepolia => {
                NetworkConfig::custom("sepolia", "https://testnet-rpc.ten.xyz/v1", 8443)
            }
            Environment::Dexynth => NetworkConfig::custom(
                "dexynth",
                "https://rpc.dexynth-gateway.ten.xyz/v1",
                8443,
            ),
            Environment::Uat => {
                NetworkConfig::custom("uat", "https://rpc.uat-gw-testnet.ten.xyz/v1", 7443)
            }
            Environment::Local => NetworkConfig::custom("local", LOCAL_BASE_URL, LOCAL_CHAIN_ID),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Sepolia => "sepolia",
            Environment::Dexynth => "dexynth",
            Environment::Uat => "uat",
            Environment::Local => "local",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().to_ascii_lowercase();
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str() == value)
            .ok_or_else(|| {
                format!("Unknown environment `{raw}` (expected sepolia, dexynth, uat or local)")
            })
    }
}

/// Loopback endpoint served by `gateway-harness simulate`.
pub const LOCAL_BASE_URL: &str = "http://127.0.0.1:3000/v1";

/// Chain ID reported by the local gateway.
pub const LOCAL_CHAIN_ID: u64 = 443;

/// Gas used by a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Ephemeral transfer request, used to correlate a submission with its confirmation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// A transfer accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: B256,
    pub transfer: FundTransfer,
}

/// Transaction receipt after inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: B256,
    /// Block number where transaction was included
    pub block_number: u64,
    /// Gas actually used
    pub gas_used: u64,
    /// Whether the transaction was successful
    pub success: bool,
}
