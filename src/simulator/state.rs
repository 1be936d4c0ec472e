// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory ledger behind the simulated gateway.
//!
//! All methods are synchronous and run under the simulator's lock.
//! Expiry is applied lazily: every entry point first sweeps keys whose
//! lifetime has elapsed and returns their funds to the owner.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use alloy::{
    consensus::TxEnvelope,
    eips::eip2718::Decodable2718,
    primitives::{keccak256, Address, B256, U256},
};
use tokio::time::Instant;
use tracing::{debug, info};

use super::SimulatorConfig;
use crate::blockchain::signing::recover_challenge_signer;
use crate::blockchain::{Identity, TRANSFER_GAS};

pub const RPC_INVALID_PARAMS: i64 = -32602;
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_EXECUTION_ERROR: i64 = -32000;

/// A JSON-RPC level failure (HTTP 200 with an `error` object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub code: i64,
    pub message: String,
}

impl RpcFailure {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: RPC_INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            code: RPC_EXECUTION_ERROR,
            message: message.into(),
        }
    }
}

/// Why an authentication attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Token never issued or already used.
    UnknownToken,
    SignatureMismatch(String),
}

/// A settled transfer, one per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimReceipt {
    pub tx_hash: B256,
    pub from: Address,
    pub to: Address,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    pub success: bool,
}

#[derive(Debug, Clone)]
struct SimSessionKey {
    owner: Address,
    expires_at: Option<Instant>,
    spend_limit: Option<U256>,
    spent: U256,
}

struct JoinWindow {
    started: Instant,
    count: u32,
}

pub struct SimState {
    config: SimulatorConfig,
    pending_tokens: HashSet<String>,
    sessions: HashMap<String, Address>,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    session_keys: HashMap<Address, SimSessionKey>,
    receipts: HashMap<B256, SimReceipt>,
    block_number: u64,
    join_window: Option<JoinWindow>,
}

impl SimState {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            pending_tokens: HashSet::new(),
            sessions: HashMap::new(),
            balances: HashMap::new(),
            nonces: HashMap::new(),
            session_keys: HashMap::new(),
            receipts: HashMap::new(),
            block_number: 0,
            join_window: None,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn transfer_fee(&self) -> U256 {
        U256::from(TRANSFER_GAS) * U256::from(self.config.gas_price)
    }

    /// Issue a single-use challenge token, or `None` when joins are rate limited.
    pub fn issue_token(&mut self) -> Option<String> {
        if let Some(limit) = self.config.join_rate_limit {
            let now = Instant::now();
            let window = self.join_window.get_or_insert(JoinWindow {
                started: now,
                count: 0,
            });
            if now.duration_since(window.started) >= Duration::from_secs(1) {
                window.started = now;
                window.count = 0;
            }
            if window.count >= limit {
                return None;
            }
            window.count += 1;
        }

        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        let token = alloy::hex::encode(&bytes[..20]);
        self.pending_tokens.insert(token.clone());
        Some(token)
    }

    /// Consume `token` and bind it to `address` if the signature checks out.
    pub fn authenticate(
        &mut self,
        token: &str,
        address: Address,
        signature: &str,
    ) -> Result<(), AuthFailure> {
        if !self.pending_tokens.remove(token) {
            return Err(AuthFailure::UnknownToken);
        }

        let recovered = recover_challenge_signer(token, self.config.chain_id, signature)
            .map_err(|e| AuthFailure::SignatureMismatch(e.to_string()))?;
        if recovered != address {
            return Err(AuthFailure::SignatureMismatch(format!(
                "signature recovers to {recovered}, not {address}"
            )));
        }

        self.sessions.insert(token.to_string(), address);
        if let Some(amount) = self.config.auto_fund {
            let balance = self.balances.entry(address).or_default();
            if balance.is_zero() {
                *balance = amount;
                info!(account = %address, amount_wei = %amount, "Auto-funded account");
            }
        }
        Ok(())
    }

    /// Account bound to an authenticated token.
    pub fn account_for(&self, token: &str) -> Option<Address> {
        self.sessions.get(token).copied()
    }

    pub fn credit(&mut self, address: Address, amount: U256) {
        let balance = self.balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance(&mut self, address: Address) -> U256 {
        self.sweep_expired();
        self.balances.get(&address).copied().unwrap_or_default()
    }

    pub fn nonce(&mut self, address: Address) -> u64 {
        self.sweep_expired();
        self.nonces.get(&address).copied().unwrap_or_default()
    }

    pub fn receipt(&self, tx_hash: &B256) -> Option<SimReceipt> {
        self.receipts.get(tx_hash).cloned()
    }

    pub fn create_session_key(
        &mut self,
        owner: Address,
        expiry_seconds: Option<u64>,
        spend_limit: Option<U256>,
    ) -> Address {
        self.sweep_expired();
        let address = Identity::random().address();
        let lifetime = expiry_seconds
            .map(Duration::from_secs)
            .or(self.config.default_key_expiry);

        self.session_keys.insert(
            address,
            SimSessionKey {
                owner,
                expires_at: lifetime.map(|d| Instant::now() + d),
                spend_limit,
                spent: U256::ZERO,
            },
        );
        debug!(owner = %owner, session_key = %address, ?lifetime, "Session key created");
        address
    }

    /// Delete a key owned by `owner`. `false` when no such key exists.
    pub fn delete_session_key(&mut self, owner: Address, address: Address) -> bool {
        self.sweep_expired();
        let owned = self
            .session_keys
            .get(&address)
            .is_some_and(|key| key.owner == owner);
        if owned {
            self.retire_key(address, "deleted");
        }
        owned
    }

    pub fn list_session_keys(&mut self, owner: Address) -> Vec<Address> {
        self.sweep_expired();
        let mut keys: Vec<Address> = self
            .session_keys
            .iter()
            .filter(|(_, key)| key.owner == owner)
            .map(|(address, _)| *address)
            .collect();
        keys.sort();
        keys
    }

    /// Apply a signed legacy transfer.
    pub fn apply_raw_transaction(&mut self, raw: &[u8]) -> Result<B256, RpcFailure> {
        self.sweep_expired();

        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| RpcFailure::invalid_params(format!("undecodable transaction: {e}")))?;
        let TxEnvelope::Legacy(signed) = envelope else {
            return Err(RpcFailure::invalid_params("only legacy transactions are accepted"));
        };

        let tx = signed.tx();
        if tx.chain_id != Some(self.config.chain_id) {
            return Err(RpcFailure::execution(format!(
                "invalid chain id {:?}",
                tx.chain_id
            )));
        }
        let to = tx
            .to
            .to()
            .copied()
            .ok_or_else(|| RpcFailure::execution("contract creation is not supported"))?;
        let from = signed
            .signature()
            .recover_address_from_prehash(&signed.signature_hash())
            .map_err(|e| RpcFailure::invalid_params(format!("unrecoverable signature: {e}")))?;

        let expected_nonce = self.nonces.get(&from).copied().unwrap_or_default();
        if tx.nonce != expected_nonce {
            return Err(RpcFailure::execution(format!(
                "nonce mismatch: expected {expected_nonce}, got {}",
                tx.nonce
            )));
        }

        let tx_hash = *signed.hash();
        self.settle(from, to, tx.value, tx.gas_price, tx_hash)?;
        Ok(tx_hash)
    }

    /// Apply a gateway-signed transfer out of a session key owned by `owner`.
    pub fn apply_session_key_transaction(
        &mut self,
        owner: Address,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<B256, RpcFailure> {
        self.sweep_expired();

        let key = self
            .session_keys
            .get(&from)
            .filter(|key| key.owner == owner)
            .ok_or_else(|| RpcFailure::execution(format!("unknown session key {from}")))?;
        let spent = key.spent.saturating_add(value);
        if key.spend_limit.is_some_and(|limit| spent > limit) {
            return Err(RpcFailure::execution("session key spend limit exceeded"));
        }

        let nonce = self.nonces.get(&from).copied().unwrap_or_default();
        let mut preimage = Vec::with_capacity(20 + 20 + 32 + 8);
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(to.as_slice());
        preimage.extend_from_slice(&value.to_be_bytes::<32>());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let tx_hash = keccak256(&preimage);

        let gas_price = self.config.gas_price;
        self.settle(from, to, value, gas_price, tx_hash)?;
        if let Some(key) = self.session_keys.get_mut(&from) {
            key.spent = spent;
        }
        Ok(tx_hash)
    }

    fn settle(
        &mut self,
        from: Address,
        to: Address,
        value: U256,
        gas_price: u128,
        tx_hash: B256,
    ) -> Result<(), RpcFailure> {
        let fee = U256::from(TRANSFER_GAS) * U256::from(gas_price);
        let balance = self.balances.get(&from).copied().unwrap_or_default();
        let cost = value.saturating_add(fee);
        if balance < cost {
            return Err(RpcFailure::execution(format!(
                "insufficient funds: balance {balance}, cost {cost}"
            )));
        }

        self.balances.insert(from, balance - cost);
        self.credit(to, value);
        *self.nonces.entry(from).or_default() += 1;
        self.block_number += 1;
        self.receipts.insert(
            tx_hash,
            SimReceipt {
                tx_hash,
                from,
                to,
                block_number: self.block_number,
                gas_used: TRANSFER_GAS,
                gas_price,
                success: true,
            },
        );
        debug!(from = %from, to = %to, value_wei = %value, tx_hash = %tx_hash, "Transfer settled");
        Ok(())
    }

    /// Remove expired keys and return their funds.
    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<Address> = self
            .session_keys
            .iter()
            .filter(|(_, key)| key.expires_at.is_some_and(|at| now >= at))
            .map(|(address, _)| *address)
            .collect();
        for address in expired {
            self.retire_key(address, "expired");
        }
    }

    /// Drop a key and return its balance, less one transfer fee, to the owner.
    fn retire_key(&mut self, address: Address, reason: &'static str) {
        let Some(key) = self.session_keys.remove(&address) else {
            return;
        };
        let balance = self.balances.remove(&address).unwrap_or_default();
        let returned = balance.saturating_sub(self.transfer_fee());
        if !returned.is_zero() {
            self.credit(key.owner, returned);
        }
        info!(
            session_key = %address,
            owner = %key.owner,
            reason,
            returned_wei = %returned,
            "Session key retired"
        );
    }
}
