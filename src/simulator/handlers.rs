// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::borrow::Cow;
use std::str::FromStr;

use alloy::primitives::{Address, Bloom, Bytes, B256, U128, U64};
use alloy::rpc::json_rpc::{ErrorPayload, Id, Response, ResponsePayload};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::error::SimError;
use super::state::{AuthFailure, RpcFailure, SimReceipt, SimState, RPC_METHOD_NOT_FOUND};
use super::SharedState;
use crate::blockchain::TRANSFER_GAS;
use crate::gateway::rpc::{
    CreateSessionKeyParams, SessionKeyTransaction, METHOD_CHAIN_ID, METHOD_CREATE_SESSION_KEY,
    METHOD_DELETE_SESSION_KEY, METHOD_ESTIMATE_GAS, METHOD_GAS_PRICE, METHOD_GET_BALANCE,
    METHOD_GET_TRANSACTION_COUNT, METHOD_GET_TRANSACTION_RECEIPT, METHOD_LIST_SESSION_KEYS,
    METHOD_SEND_RAW_TRANSACTION, METHOD_SEND_TRANSACTION,
};

type RpcResponse = Response<Value, Value>;

/// Incoming JSON-RPC call. `params` may be absent, `null` or an array.
#[derive(Debug, Deserialize)]
pub struct RpcCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Id>,
}

impl RpcCall {
    fn params(&self) -> &[Value] {
        self.params.as_array().map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub signature: String,
    pub address: String,
}

/// `GET /v1/join/`
pub async fn join(State(state): State<SharedState>) -> Result<String, SimError> {
    state
        .lock()
        .await
        .issue_token()
        .ok_or_else(|| SimError::too_many_requests("join rate limit exceeded"))
}

/// `POST /v1/authenticate/?token=`
pub async fn authenticate(
    State(state): State<SharedState>,
    Query(query): Query<TokenQuery>,
    Json(request): Json<AuthenticateRequest>,
) -> Result<&'static str, SimError> {
    let token = query
        .token
        .ok_or_else(|| SimError::bad_request("missing token"))?;
    let address = Address::from_str(request.address.trim())
        .map_err(|e| SimError::bad_request(format!("invalid address: {e}")))?;

    match state
        .lock()
        .await
        .authenticate(&token, address, &request.signature)
    {
        Ok(()) => Ok("success"),
        Err(AuthFailure::UnknownToken) => Err(SimError::not_found(
            "unknown or already consumed token",
        )),
        Err(AuthFailure::SignatureMismatch(reason)) => Err(SimError::unauthorized(format!(
            "signature rejected: {reason}"
        ))),
    }
}

/// `POST /v1/?token=`
pub async fn rpc(
    State(state): State<SharedState>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<Value>,
) -> Result<Json<RpcResponse>, SimError> {
    let token = query
        .token
        .ok_or_else(|| SimError::unauthorized("missing token"))?;

    let mut state = state.lock().await;
    let account = state
        .account_for(&token)
        .ok_or_else(|| SimError::unauthorized("token is not authenticated"))?;

    let call: RpcCall = serde_json::from_value(body)
        .map_err(|e| SimError::bad_request(format!("invalid JSON-RPC request: {e}")))?;
    debug!(method = %call.method, account = %account, "Simulated RPC");

    let payload = match dispatch(&mut state, account, &call.method, call.params()) {
        Ok(result) => ResponsePayload::Success(result),
        Err(failure) => ResponsePayload::Failure(ErrorPayload {
            code: failure.code,
            message: Cow::Owned(failure.message),
            data: None,
        }),
    };
    Ok(Json(Response {
        id: call.id.unwrap_or(Id::None),
        payload,
    }))
}

fn dispatch(
    state: &mut SimState,
    account: Address,
    method: &str,
    params: &[Value],
) -> Result<Value, RpcFailure> {
    match method {
        METHOD_CHAIN_ID => Ok(json!(U64::from(state.config().chain_id))),
        METHOD_GET_BALANCE => {
            let address: Address = param(params, 0)?;
            Ok(json!(state.balance(address)))
        }
        METHOD_GET_TRANSACTION_COUNT => {
            let address: Address = param(params, 0)?;
            Ok(json!(U64::from(state.nonce(address))))
        }
        METHOD_GAS_PRICE => Ok(json!(U128::from(state.config().gas_price))),
        METHOD_ESTIMATE_GAS => Ok(json!(U64::from(TRANSFER_GAS))),
        METHOD_SEND_RAW_TRANSACTION => {
            let raw: Bytes = param(params, 0)?;
            let tx_hash = state.apply_raw_transaction(&raw)?;
            Ok(json!(tx_hash))
        }
        METHOD_SEND_TRANSACTION => {
            let tx: SessionKeyTransaction = param(params, 0)?;
            let tx_hash = state.apply_session_key_transaction(account, tx.from, tx.to, tx.value)?;
            Ok(json!(tx_hash))
        }
        METHOD_GET_TRANSACTION_RECEIPT => {
            let tx_hash: B256 = param(params, 0)?;
            Ok(state
                .receipt(&tx_hash)
                .map(|receipt| receipt_json(&receipt))
                .unwrap_or(Value::Null))
        }
        METHOD_CREATE_SESSION_KEY => {
            let options: CreateSessionKeyParams = match params.first() {
                Some(value) if !value.is_null() => param(params, 0)?,
                _ => CreateSessionKeyParams::default(),
            };
            let address =
                state.create_session_key(account, options.expiry_seconds, options.spend_limit);
            Ok(json!(address))
        }
        METHOD_DELETE_SESSION_KEY => {
            let address: Address = param(params, 0)?;
            Ok(json!(state.delete_session_key(account, address)))
        }
        METHOD_LIST_SESSION_KEYS => Ok(json!(state.list_session_keys(account))),
        other => Err(RpcFailure {
            code: RPC_METHOD_NOT_FOUND,
            message: format!("method {other} not supported"),
        }),
    }
}

/// Legacy receipt in the shape an Ethereum node returns.
fn receipt_json(receipt: &SimReceipt) -> Value {
    let gas_used = U64::from(receipt.gas_used);
    json!({
        "type": "0x0",
        "status": if receipt.success { "0x1" } else { "0x0" },
        "transactionHash": receipt.tx_hash,
        "transactionIndex": U64::ZERO,
        "blockHash": B256::left_padding_from(&receipt.block_number.to_be_bytes()),
        "blockNumber": U64::from(receipt.block_number),
        "from": receipt.from,
        "to": receipt.to,
        "contractAddress": Value::Null,
        "cumulativeGasUsed": gas_used,
        "gasUsed": gas_used,
        "effectiveGasPrice": U128::from(receipt.gas_price),
        "logs": [],
        "logsBloom": Bloom::ZERO,
    })
}

fn param<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, RpcFailure> {
    let value = params
        .get(index)
        .cloned()
        .ok_or_else(|| RpcFailure::invalid_params(format!("missing parameter {index}")))?;
    serde_json::from_value(value)
        .map_err(|e| RpcFailure::invalid_params(format!("parameter {index}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatorConfig;

    #[test]
    fn unknown_methods_are_reported_as_rpc_errors() {
        let mut state = SimState::new(SimulatorConfig::default());
        let err = dispatch(&mut state, Address::ZERO, "eth_mine", &[]).unwrap_err();
        assert_eq!(err.code, RPC_METHOD_NOT_FOUND);
    }

    #[test]
    fn create_accepts_missing_or_null_options() {
        let mut state = SimState::new(SimulatorConfig::default());
        let owner = Address::repeat_byte(0x0c);

        dispatch(&mut state, owner, METHOD_CREATE_SESSION_KEY, &[]).unwrap();
        dispatch(&mut state, owner, METHOD_CREATE_SESSION_KEY, &[Value::Null]).unwrap();
        dispatch(
            &mut state,
            owner,
            METHOD_CREATE_SESSION_KEY,
            &[json!({ "expirySeconds": 30, "spendLimit": "0x10" })],
        )
        .unwrap();

        let listed = dispatch(&mut state, owner, METHOD_LIST_SESSION_KEYS, &[]).unwrap();
        assert_eq!(listed.as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn malformed_params_are_invalid_params() {
        let mut state = SimState::new(SimulatorConfig::default());
        let err = dispatch(&mut state, Address::ZERO, METHOD_GET_BALANCE, &[json!("0x1234")])
            .unwrap_err();
        assert_eq!(err.code, crate::simulator::state::RPC_INVALID_PARAMS);
    }

    #[test]
    fn pending_receipt_is_null() {
        let mut state = SimState::new(SimulatorConfig::default());
        let result = dispatch(
            &mut state,
            Address::ZERO,
            METHOD_GET_TRANSACTION_RECEIPT,
            &[json!(B256::ZERO)],
        )
        .unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn calls_without_params_or_id_are_answered() {
        let call: RpcCall =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "method": METHOD_GAS_PRICE }))
                .unwrap();
        assert!(call.params().is_empty());
        assert!(call.id.is_none());

        let mut state = SimState::new(SimulatorConfig::default());
        let price = dispatch(&mut state, Address::ZERO, &call.method, call.params()).unwrap();
        assert_eq!(price, json!("0x3b9aca00"));
    }

    #[test]
    fn receipts_decode_as_node_receipts() {
        use alloy::network::ReceiptResponse;
        use alloy::rpc::types::TransactionReceipt;

        let receipt = SimReceipt {
            tx_hash: B256::repeat_byte(0xab),
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            block_number: 16,
            gas_used: TRANSFER_GAS,
            gas_price: 1_000_000_000,
            success: true,
        };
        let decoded: TransactionReceipt = serde_json::from_value(receipt_json(&receipt)).unwrap();
        assert!(decoded.status());
        assert_eq!(decoded.transaction_hash(), receipt.tx_hash);
        assert_eq!(decoded.block_number(), Some(16));
        assert_eq!(decoded.gas_used(), TRANSFER_GAS);
        assert_eq!(decoded.from, receipt.from);
    }
}
