// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One user's view of the gateway: identity, transport and handshake state.

use alloy::primitives::{Address, U256};
use tracing::{debug, info, warn};

use super::handshake::{Handshake, HandshakeState, Session};
use super::rpc::RpcClient;
use super::session_keys::{SessionKey, SessionKeyConfig, SessionKeyManager};
use super::transport::GatewayTransport;
use crate::blockchain::{
    FundTransfer, Identity, LegacyTransfer, NetworkConfig, TransferReceipt, TRANSFER_GAS,
};
use crate::error::GatewayError;

/// Gateway client for a single user.
///
/// Owns its handshake state; a failed step resets it to `Unauthenticated`.
#[derive(Debug)]
pub struct GatewayClient {
    transport: GatewayTransport,
    identity: Identity,
    handshake: Handshake,
    state: HandshakeState,
}

impl GatewayClient {
    pub fn new(network: NetworkConfig, identity: Identity) -> Result<Self, GatewayError> {
        Ok(Self::with_transport(GatewayTransport::new(network)?, identity))
    }

    /// Build a client sharing an existing transport (and its connection pool).
    pub fn with_transport(transport: GatewayTransport, identity: Identity) -> Self {
        Self {
            handshake: Handshake::new(transport.clone()),
            transport,
            identity,
            state: HandshakeState::Unauthenticated,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn network(&self) -> &NetworkConfig {
        self.transport.network()
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.state.session()
    }

    pub async fn join(&mut self) -> Result<(), GatewayError> {
        let state = std::mem::take(&mut self.state);
        self.state = self.handshake.join(state).await?;
        Ok(())
    }

    pub fn sign_challenge(&mut self) -> Result<(), GatewayError> {
        let state = std::mem::take(&mut self.state);
        self.state = self.handshake.sign_challenge(state, &self.identity)?;
        Ok(())
    }

    pub async fn authenticate(&mut self) -> Result<&Session, GatewayError> {
        let state = std::mem::take(&mut self.state);
        self.state = self.handshake.authenticate(state).await?;
        self.state.require_session()
    }

    /// join -> sign -> authenticate, starting over from `Unauthenticated`.
    pub async fn full_auth_flow(&mut self) -> Result<&Session, GatewayError> {
        self.state = HandshakeState::Unauthenticated;
        self.join().await?;
        self.sign_challenge()?;
        self.authenticate().await
    }

    /// RPC client bound to the current session.
    pub fn rpc(&self) -> Result<RpcClient, GatewayError> {
        let session = self.state.require_session()?;
        RpcClient::new(&self.transport, session)
    }

    pub fn session_keys(&self) -> SessionKeyManager {
        SessionKeyManager::new(self.transport.clone())
    }

    /// Owner account balance.
    pub async fn get_balance(&self) -> Result<U256, GatewayError> {
        self.rpc()?.get_balance(self.address()).await
    }

    pub async fn balance_of(&self, address: Address) -> Result<U256, GatewayError> {
        self.rpc()?.get_balance(address).await
    }

    /// Sign and submit a legacy transfer from the owner account.
    ///
    /// Missing gas values are fetched from the gateway.
    pub async fn send_transaction(
        &self,
        to: Address,
        value: U256,
        gas_limit: Option<u64>,
        gas_price: Option<u128>,
    ) -> Result<TransferReceipt, GatewayError> {
        let rpc = self.rpc()?;
        let from = self.address();

        let nonce = rpc.get_transaction_count(from).await?;
        let gas_price = match gas_price {
            Some(price) => price,
            None => rpc.gas_price().await?,
        };
        let gas_limit = match gas_limit {
            Some(limit) => limit,
            None => match rpc.estimate_gas(from, to, value).await {
                Ok(estimate) => estimate,
                Err(e) => {
                    warn!(error = %e, "Gas estimation failed, using transfer default");
                    TRANSFER_GAS
                }
            },
        };

        let signed = self.identity.sign_transfer(&LegacyTransfer {
            chain_id: self.transport.chain_id(),
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
        })?;
        debug!(nonce, gas_limit, gas_price, "Signed owner transfer");

        let tx_hash = rpc.send_raw_transaction(&signed.raw).await?;
        if tx_hash != signed.tx_hash {
            warn!(
                local = %signed.tx_hash,
                gateway = %tx_hash,
                "Gateway reported a different transaction hash"
            );
        }

        info!(from = %from, to = %to, amount_wei = %value, tx_hash = %tx_hash, "Transfer submitted");
        Ok(TransferReceipt {
            tx_hash,
            transfer: FundTransfer {
                from,
                to,
                amount: value,
            },
        })
    }

    pub async fn create_session_key(
        &self,
        config: &SessionKeyConfig,
    ) -> Result<SessionKey, GatewayError> {
        self.session_keys()
            .create_session_key(&self.state, config)
            .await
    }

    /// Move `amount` from the owner account into `key`.
    pub async fn fund_session_key(
        &self,
        key: &SessionKey,
        amount: U256,
    ) -> Result<TransferReceipt, GatewayError> {
        key.ensure_can_spend(U256::ZERO)?;
        self.send_transaction(key.address, amount, None, None).await
    }

    pub async fn delete_session_key(&self, key: &mut SessionKey) -> Result<(), GatewayError> {
        self.session_keys().delete_session_key(&self.state, key).await
    }

    pub async fn send_as_session_key(
        &self,
        key: &mut SessionKey,
        to: Address,
        amount: U256,
    ) -> Result<TransferReceipt, GatewayError> {
        self.session_keys()
            .send_as_session_key(&self.state, key, to, amount)
            .await
    }
}
