// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC calls issued through the gateway on behalf of an authenticated session.
//!
//! Standard `eth_*` calls go through an alloy provider connected to
//! `{base}/?token=<token>`. The gateway's `sessionkeys_*` extensions use
//! `raw_request` on the same provider.

use std::fmt;

use alloy::{
    network::{Ethereum, ReceiptResponse},
    primitives::{Address, Bytes, B256, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::{
        client::RpcClient as JsonRpcClient,
        types::{TransactionReceipt, TransactionRequest},
    },
    transports::http::Http,
};
use serde::{Deserialize, Serialize};

use super::handshake::Session;
use super::transport::GatewayTransport;
use crate::blockchain::TxReceipt;
use crate::error::GatewayError;

pub const METHOD_GET_BALANCE: &str = "eth_getBalance";
pub const METHOD_GET_TRANSACTION_COUNT: &str = "eth_getTransactionCount";
pub const METHOD_GAS_PRICE: &str = "eth_gasPrice";
pub const METHOD_CHAIN_ID: &str = "eth_chainId";
pub const METHOD_ESTIMATE_GAS: &str = "eth_estimateGas";
pub const METHOD_SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";
pub const METHOD_SEND_TRANSACTION: &str = "eth_sendTransaction";
pub const METHOD_GET_TRANSACTION_RECEIPT: &str = "eth_getTransactionReceipt";
pub const METHOD_CREATE_SESSION_KEY: &str = "sessionkeys_Create";
pub const METHOD_DELETE_SESSION_KEY: &str = "sessionkeys_Delete";
pub const METHOD_LIST_SESSION_KEYS: &str = "sessionkeys_List";

/// HTTP provider bound to one session token (with the recommended fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Optional parameters accepted by `sessionkeys_Create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionKeyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_seconds: Option<u64>,
    /// Cumulative cap in wei, sent as a hex quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_limit: Option<U256>,
}

/// A gateway-signed transfer submitted from a session key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyTransaction {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
}

/// Typed JSON-RPC client scoped to one authenticated session token.
///
/// Cheap to clone; clones share the transport's connection pool.
#[derive(Clone)]
pub struct RpcClient {
    provider: HttpProvider,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

impl RpcClient {
    pub fn new(transport: &GatewayTransport, session: &Session) -> Result<Self, GatewayError> {
        let url = transport.rpc_url(&session.auth_token)?;
        let http = Http::with_client(transport.http_client().clone(), url);
        let provider = ProviderBuilder::new().connect_client(JsonRpcClient::new(http, false));
        Ok(Self { provider })
    }

    /// Native balance in wei at the latest block.
    pub async fn get_balance(&self, address: Address) -> Result<U256, GatewayError> {
        Ok(self.provider.get_balance(address).await?)
    }

    /// Transaction count (next nonce) at the latest block.
    pub async fn get_transaction_count(&self, address: Address) -> Result<u64, GatewayError> {
        Ok(self.provider.get_transaction_count(address).await?)
    }

    pub async fn gas_price(&self) -> Result<u128, GatewayError> {
        Ok(self.provider.get_gas_price().await?)
    }

    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<u64, GatewayError> {
        let tx = TransactionRequest::default()
            .from(from)
            .to(to)
            .value(value);
        Ok(self.provider.estimate_gas(tx).await?)
    }

    pub async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, GatewayError> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending.tx_hash())
    }

    pub async fn send_session_key_transaction(
        &self,
        tx: &SessionKeyTransaction,
    ) -> Result<B256, GatewayError> {
        Ok(self
            .provider
            .raw_request(METHOD_SEND_TRANSACTION.into(), (tx.clone(),))
            .await?)
    }

    /// Receipt for `tx_hash`, or `None` while the transaction is pending.
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, GatewayError> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.as_ref().map(tx_receipt))
    }

    pub async fn create_session_key(
        &self,
        params: &CreateSessionKeyParams,
    ) -> Result<Address, GatewayError> {
        let mut call_params = Vec::new();
        if *params != CreateSessionKeyParams::default() {
            call_params.push(params.clone());
        }
        Ok(self
            .provider
            .raw_request(METHOD_CREATE_SESSION_KEY.into(), call_params)
            .await?)
    }

    /// Returns `false` when the gateway does not know the key.
    pub async fn delete_session_key(&self, address: Address) -> Result<bool, GatewayError> {
        Ok(self
            .provider
            .raw_request(METHOD_DELETE_SESSION_KEY.into(), (address,))
            .await?)
    }

    pub async fn list_session_keys(&self) -> Result<Vec<Address>, GatewayError> {
        Ok(self
            .provider
            .raw_request(METHOD_LIST_SESSION_KEYS.into(), ())
            .await?)
    }
}

fn tx_receipt(receipt: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        tx_hash: receipt.transaction_hash(),
        block_number: receipt.block_number().unwrap_or_default(),
        gas_used: receipt.gas_used(),
        success: receipt.status(),
    }
}
