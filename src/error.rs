// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for gateway interactions.
//!
//! | Variant | Meaning | Caller policy |
//! |---------|---------|---------------|
//! | `Transport` | Non-2xx response or connection fault | Retry-safe inside polling loops |
//! | `ChallengeExpired` / `AuthRejected` | Handshake failed | Restart from `join()`, never retried in place |
//! | `NotAuthenticated` | Operation issued before the handshake completed | Fatal ordering bug |
//! | `SessionKeyNotFound` | Key unknown to the gateway | Idempotent success for deletes |
//! | `FundsNotReceived` / `ExpirationTimeout` | Wait deadline exceeded | Surface to the operator, abort the scenario |

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::transports::{RpcError, TransportErrorKind};

use crate::gateway::session_keys::SessionKeyStatus;

/// Errors raised by the gateway client, the handshake and the lifecycle monitor.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Non-2xx response (`status` set) or connection fault (`status` is `None`).
    #[error("Gateway transport error (status {}): {body}", display_status(.status))]
    Transport { status: Option<u16>, body: String },

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Challenge expired or already consumed: {0}")]
    ChallengeExpired(String),

    #[error("Authentication rejected by gateway: {0}")]
    AuthRejected(String),

    #[error("Not authenticated: complete join -> sign -> authenticate first")]
    NotAuthenticated,

    #[error("Handshake step `{step}` is not valid in state {state}")]
    InvalidHandshakeState {
        step: &'static str,
        state: &'static str,
    },

    #[error("Session key not found: {0}")]
    SessionKeyNotFound(Address),

    #[error("Session key {address} is {status} and cannot authorize spends")]
    SessionKeyInactive {
        address: Address,
        status: SessionKeyStatus,
    },

    #[error("Transfer of {amount} wei exceeds session key spend limit of {limit} wei")]
    SpendLimitExceeded { limit: U256, amount: U256 },

    #[error("No funds above {threshold} wei received at {address} within {timeout:?}")]
    FundsNotReceived {
        address: Address,
        threshold: U256,
        timeout: Duration,
    },

    #[error("Session key {address} did not expire and return its funds within {timeout:?}")]
    ExpirationTimeout { address: Address, timeout: Duration },

    #[error("Transaction {tx_hash} was not included within {timeout:?}")]
    ReceiptTimeout { tx_hash: B256, timeout: Duration },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// A background wait task panicked or was aborted before reporting.
    #[error("Wait task failed: {0}")]
    WaitAborted(String),
}

impl From<RpcError<TransportErrorKind>> for GatewayError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        match err {
            RpcError::ErrorResp(payload) => Self::Rpc {
                code: payload.code,
                message: payload.message.into_owned(),
            },
            RpcError::Transport(TransportErrorKind::HttpError(http)) => Self::Transport {
                status: Some(http.status),
                body: http.body,
            },
            RpcError::Transport(kind) => Self::connection(kind.to_string()),
            RpcError::NullResp => Self::InvalidResponse("null JSON-RPC result".to_string()),
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

impl GatewayError {
    /// Build a transport error for a connection-level failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            body: message.into(),
        }
    }

    /// Whether a polling loop may treat this failure as transient and poll again.
    ///
    /// Handshake, key and ordering errors are never retry-safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Rpc { .. })
    }

    /// Whether this failure means a wait deadline elapsed.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            Self::FundsNotReceived { .. }
                | Self::ExpirationTimeout { .. }
                | Self::ReceiptTimeout { .. }
        )
    }
}

fn display_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_rpc_errors_are_retryable() {
        assert!(GatewayError::connection("refused").is_retryable());
        assert!(GatewayError::Transport {
            status: Some(502),
            body: "bad gateway".to_string()
        }
        .is_retryable());
        assert!(GatewayError::Rpc {
            code: -32000,
            message: "busy".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn handshake_and_ordering_errors_are_not_retryable() {
        assert!(!GatewayError::NotAuthenticated.is_retryable());
        assert!(!GatewayError::AuthRejected("mismatch".to_string()).is_retryable());
        assert!(!GatewayError::ChallengeExpired("stale".to_string()).is_retryable());
        assert!(!GatewayError::InvalidKey("short".to_string()).is_retryable());
    }

    #[test]
    fn deadline_errors_are_distinct_from_transport_failures() {
        let timeout = GatewayError::FundsNotReceived {
            address: Address::ZERO,
            threshold: U256::ZERO,
            timeout: Duration::from_secs(2),
        };
        assert!(timeout.is_deadline_exceeded());
        assert!(!timeout.is_retryable());
        assert!(!GatewayError::connection("reset").is_deadline_exceeded());
    }

    #[test]
    fn provider_errors_map_onto_gateway_errors() {
        let http: GatewayError = TransportErrorKind::http_error(429, "slow down".to_string()).into();
        assert!(matches!(
            http,
            GatewayError::Transport { status: Some(429), ref body } if body == "slow down"
        ));
        assert!(http.is_retryable());

        let payload: alloy::rpc::json_rpc::ErrorPayload =
            serde_json::from_str(r#"{"code":-32000,"message":"insufficient funds"}"#).unwrap();
        let rpc: GatewayError = RpcError::<TransportErrorKind>::err_resp(payload).into();
        assert!(matches!(
            rpc,
            GatewayError::Rpc { code: -32000, ref message } if message == "insufficient funds"
        ));

        let gone: GatewayError = TransportErrorKind::backend_gone().into();
        assert!(matches!(gone, GatewayError::Transport { status: None, .. }));
    }

    #[test]
    fn transport_error_message_includes_status_and_body() {
        let err = GatewayError::Transport {
            status: Some(429),
            body: "rate limited".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Gateway transport error (status 429): rate limited"
        );
        assert_eq!(
            GatewayError::connection("refused").to_string(),
            "Gateway transport error (status none): refused"
        );
    }
}
