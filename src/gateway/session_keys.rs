// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Key Manager
//!
//! Session keys are custodied by the gateway: the client only ever sees their
//! address. [`SessionKey`] is a read-through cache of the gateway's view and is
//! refreshed by explicit queries. Every operation takes the caller's
//! [`HandshakeState`] and fails with `NotAuthenticated` before touching the
//! network when the handshake has not completed.
//!
//! Status moves one way: `ACTIVE -> EXPIRED | DELETED`. Both terminal states
//! are absorbing and never authorize another spend.

use std::fmt;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::handshake::HandshakeState;
use super::rpc::{CreateSessionKeyParams, RpcClient, SessionKeyTransaction};
use super::transport::GatewayTransport;
use crate::blockchain::{FundTransfer, TransferReceipt};
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKeyStatus {
    Active,
    Expired,
    Deleted,
}

impl SessionKeyStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionKeyStatus::Active)
    }
}

impl fmt::Display for SessionKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionKeyStatus::Active => "ACTIVE",
            SessionKeyStatus::Expired => "EXPIRED",
            SessionKeyStatus::Deleted => "DELETED",
        })
    }
}

/// Options accepted by `create_session_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeyConfig {
    /// Lifetime after which the gateway expires the key and returns its funds.
    pub expiry_duration: Option<Duration>,
    /// Cap on the total value the key may spend.
    pub spend_limit: Option<U256>,
}

impl SessionKeyConfig {
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry_duration = Some(expiry);
        self
    }

    pub fn with_spend_limit(mut self, limit: U256) -> Self {
        self.spend_limit = Some(limit);
        self
    }

    /// Lifetime in the whole seconds the gateway accepts, rounded up and at least one.
    pub fn expiry_seconds(&self) -> Option<u64> {
        self.expiry_duration.map(|d| {
            let rounded = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            rounded.max(1)
        })
    }
}

/// A status change observed on a session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub key_id: Uuid,
    pub address: Address,
    pub from: SessionKeyStatus,
    pub to: SessionKeyStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionKey {
    /// Client-side identifier, used for log correlation.
    pub key_id: Uuid,
    pub owner: Address,
    pub address: Address,
    /// Last balance read from the gateway.
    pub balance: U256,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub config: SessionKeyConfig,
    status: SessionKeyStatus,
    expired_at: Option<DateTime<Utc>>,
    spent: U256,
}

impl SessionKey {
    /// Track a key the gateway created for `owner`, starting `ACTIVE`.
    pub fn new(owner: Address, address: Address, config: SessionKeyConfig) -> Self {
        let created_at = Utc::now();
        let expires_at = config
            .expiry_duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| created_at + d);

        Self {
            key_id: Uuid::new_v4(),
            owner,
            address,
            balance: U256::ZERO,
            created_at,
            expires_at,
            config,
            status: SessionKeyStatus::Active,
            expired_at: None,
            spent: U256::ZERO,
        }
    }

    pub fn status(&self) -> SessionKeyStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionKeyStatus::Active
    }

    /// When the key was first observed as expired.
    pub fn expired_at(&self) -> Option<DateTime<Utc>> {
        self.expired_at
    }

    /// Total value spent through this key by this client.
    pub fn spent(&self) -> U256 {
        self.spent
    }

    /// Whether the configured lifetime has elapsed at `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Record a newly observed status.
    ///
    /// Returns the transition only when the status actually changed, so each
    /// key reports `EXPIRED` (or `DELETED`) at most once.
    pub fn apply_status(&mut self, status: SessionKeyStatus) -> Option<StatusTransition> {
        if self.status == status || self.status.is_terminal() {
            return None;
        }

        let at = Utc::now();
        let transition = StatusTransition {
            key_id: self.key_id,
            address: self.address,
            from: self.status,
            to: status,
            at,
        };
        self.status = status;
        if status == SessionKeyStatus::Expired {
            self.expired_at = Some(at);
        }
        Some(transition)
    }

    /// Check that the key may authorize spending `amount` right now.
    pub fn ensure_can_spend(&self, amount: U256) -> Result<(), GatewayError> {
        let status = if self.is_active() && self.is_past_expiry(Utc::now()) {
            SessionKeyStatus::Expired
        } else {
            self.status
        };
        if status != SessionKeyStatus::Active {
            return Err(GatewayError::SessionKeyInactive {
                address: self.address,
                status,
            });
        }

        if let Some(limit) = self.config.spend_limit {
            let total = self.spent.saturating_add(amount);
            if total > limit {
                return Err(GatewayError::SpendLimitExceeded { limit, amount });
            }
        }
        Ok(())
    }
}

/// Creates, queries and deletes session keys for an authenticated account.
#[derive(Debug, Clone)]
pub struct SessionKeyManager {
    transport: GatewayTransport,
}

impl SessionKeyManager {
    pub fn new(transport: GatewayTransport) -> Self {
        Self { transport }
    }

    fn rpc(&self, auth: &HandshakeState) -> Result<RpcClient, GatewayError> {
        let session = auth.require_session()?;
        RpcClient::new(&self.transport, session)
    }

    pub async fn create_session_key(
        &self,
        auth: &HandshakeState,
        config: &SessionKeyConfig,
    ) -> Result<SessionKey, GatewayError> {
        let owner = auth.require_session()?.account_address;
        let rpc = self.rpc(auth)?;

        let expiry_seconds = config.expiry_seconds();
        let params = CreateSessionKeyParams {
            expiry_seconds,
            spend_limit: config.spend_limit,
        };
        let address = rpc.create_session_key(&params).await?;
        if address == owner {
            return Err(GatewayError::InvalidResponse(
                "gateway returned the owner address as a session key".to_string(),
            ));
        }

        // Track the lifetime the gateway was actually given.
        let config = SessionKeyConfig {
            expiry_duration: expiry_seconds.map(Duration::from_secs),
            ..config.clone()
        };
        let key = SessionKey::new(owner, address, config);
        info!(
            key_id = %key.key_id,
            owner = %owner,
            session_key = %address,
            expires_at = ?key.expires_at,
            "Created session key"
        );
        Ok(key)
    }

    /// Query the key's balance and refresh the cached value. Status is untouched.
    pub async fn get_balance(
        &self,
        auth: &HandshakeState,
        key: &mut SessionKey,
    ) -> Result<U256, GatewayError> {
        let balance = self.rpc(auth)?.get_balance(key.address).await?;
        key.balance = balance;
        Ok(balance)
    }

    /// Addresses of the caller's keys the gateway still considers active.
    pub async fn list_session_keys(
        &self,
        auth: &HandshakeState,
    ) -> Result<Vec<Address>, GatewayError> {
        self.rpc(auth)?.list_session_keys().await
    }

    /// Reconcile the cached status with the gateway's active list.
    ///
    /// An active key missing from the list is marked `EXPIRED`.
    pub async fn refresh_status(
        &self,
        auth: &HandshakeState,
        key: &mut SessionKey,
    ) -> Result<Option<StatusTransition>, GatewayError> {
        let active = self.list_session_keys(auth).await?;
        if active.contains(&key.address) {
            return Ok(None);
        }
        Ok(key.apply_status(SessionKeyStatus::Expired))
    }

    /// Delete the key; the gateway returns any remaining balance to the owner.
    ///
    /// Fails with `SessionKeyNotFound` when the gateway no longer knows the key.
    pub async fn delete_session_key(
        &self,
        auth: &HandshakeState,
        key: &mut SessionKey,
    ) -> Result<(), GatewayError> {
        let deleted = self.rpc(auth)?.delete_session_key(key.address).await?;

        if !deleted {
            if key.apply_status(SessionKeyStatus::Expired).is_some() {
                warn!(
                    key_id = %key.key_id,
                    session_key = %key.address,
                    "Session key unknown to gateway, marking expired"
                );
            }
            return Err(GatewayError::SessionKeyNotFound(key.address));
        }

        key.apply_status(SessionKeyStatus::Deleted);
        info!(
            key_id = %key.key_id,
            session_key = %key.address,
            cached_balance = %key.balance,
            "Deleted session key"
        );
        Ok(())
    }

    /// Delete, treating an already-deleted key as success.
    pub async fn delete_session_key_idempotent(
        &self,
        auth: &HandshakeState,
        key: &mut SessionKey,
    ) -> Result<(), GatewayError> {
        match self.delete_session_key(auth, key).await {
            Err(GatewayError::SessionKeyNotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Transfer `amount` out of the session key. The gateway signs with the
    /// custodied key.
    pub async fn send_as_session_key(
        &self,
        auth: &HandshakeState,
        key: &mut SessionKey,
        to: Address,
        amount: U256,
    ) -> Result<TransferReceipt, GatewayError> {
        let rpc = self.rpc(auth)?;
        key.ensure_can_spend(amount)?;

        let tx = SessionKeyTransaction {
            from: key.address,
            to,
            value: amount,
            gas: None,
            gas_price: None,
        };
        let tx_hash = rpc.send_session_key_transaction(&tx).await?;
        key.spent = key.spent.saturating_add(amount);

        info!(
            key_id = %key.key_id,
            session_key = %key.address,
            to = %to,
            amount_wei = %amount,
            tx_hash = %tx_hash,
            "Session key transfer submitted"
        );
        Ok(TransferReceipt {
            tx_hash,
            transfer: FundTransfer {
                from: key.address,
                to,
                amount,
            },
        })
    }
}
