// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Handshake
//!
//! `Unauthenticated -> Joined -> Challenged -> Authenticated`
//!
//! The handshake state is a plain value. Every step consumes the previous
//! state and returns the next one, so a caller that hits an error simply
//! starts again from [`HandshakeState::Unauthenticated`]; there is no hidden
//! state inside [`Handshake`] to reset.
//!
//! ## Steps
//!
//! 1. `join` fetches a single-use challenge token (`GET /join/`).
//! 2. `sign_challenge` signs the EIP-712 challenge locally. A challenge older
//!    than the configured TTL is refused with `ChallengeExpired`.
//! 3. `authenticate` submits the signature (`POST /authenticate/`). The
//!    gateway consumes the token whether or not it accepts the signature.
//!
//! Rejections are never retried here.

use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::transport::GatewayTransport;
use crate::blockchain::Identity;
use crate::error::GatewayError;

/// Challenges older than this are not signed.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(120);

/// Path of the challenge-issuing endpoint.
pub const JOIN_PATH: &str = "/join/";
const AUTHENTICATE_PATH: &str = "/authenticate/";

/// Body returned by the gateway when a signature is accepted.
const AUTH_SUCCESS: &str = "success";

const STALE_TOKEN_MARKERS: [&str; 5] = ["expired", "unknown", "consumed", "not found", "stale"];

/// A single-use challenge issued by `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// 20-byte hex token, without `0x`.
    pub token: String,
    pub issued_at: Instant,
}

/// Proof of a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account_address: Address,
    /// Token sent as the `token` query parameter on every authenticated call.
    pub auth_token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Unauthenticated,
    Joined(Challenge),
    Challenged {
        challenge: Challenge,
        address: Address,
        signature: String,
    },
    Authenticated(Session),
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Unauthenticated => "UNAUTHENTICATED",
            HandshakeState::Joined(_) => "JOINED",
            HandshakeState::Challenged { .. } => "CHALLENGED",
            HandshakeState::Authenticated(_) => "AUTHENTICATED",
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            HandshakeState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    /// The session, or `NotAuthenticated` for any earlier state.
    pub fn require_session(&self) -> Result<&Session, GatewayError> {
        self.session().ok_or(GatewayError::NotAuthenticated)
    }
}

/// Drives handshake transitions against one gateway.
#[derive(Debug, Clone)]
pub struct Handshake {
    transport: GatewayTransport,
    challenge_ttl: Duration,
}

impl Handshake {
    pub fn new(transport: GatewayTransport) -> Self {
        Self {
            transport,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
        }
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.transport.chain_id()
    }

    /// `Unauthenticated -> Joined`.
    pub async fn join(&self, state: HandshakeState) -> Result<HandshakeState, GatewayError> {
        if !matches!(state, HandshakeState::Unauthenticated) {
            return Err(invalid_step("join", &state));
        }

        let response = self.transport.get(JOIN_PATH, None).await?;
        let token = response.text().trim_start_matches("0x").to_string();
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GatewayError::InvalidResponse(format!(
                "join returned a malformed token: `{}`",
                response.body
            )));
        }

        debug!(network = self.transport.network().name, "Joined gateway");
        Ok(HandshakeState::Joined(Challenge {
            token,
            issued_at: Instant::now(),
        }))
    }

    /// `Joined -> Challenged`. Pure: no network I/O.
    pub fn sign_challenge(
        &self,
        state: HandshakeState,
        identity: &Identity,
    ) -> Result<HandshakeState, GatewayError> {
        let HandshakeState::Joined(challenge) = state else {
            return Err(invalid_step("sign_challenge", &state));
        };

        let age = challenge.issued_at.elapsed();
        if age > self.challenge_ttl {
            return Err(GatewayError::ChallengeExpired(format!(
                "challenge issued {age:?} ago exceeds ttl of {:?}",
                self.challenge_ttl
            )));
        }

        let signature = identity.sign_challenge(&challenge.token, self.chain_id())?;
        Ok(HandshakeState::Challenged {
            challenge,
            address: identity.address(),
            signature,
        })
    }

    /// `Challenged -> Authenticated`.
    pub async fn authenticate(
        &self,
        state: HandshakeState,
    ) -> Result<HandshakeState, GatewayError> {
        let HandshakeState::Challenged {
            challenge,
            address,
            signature,
        } = state
        else {
            return Err(invalid_step("authenticate", &state));
        };

        let body = json!({
            "signature": signature,
            "address": address.to_string(),
        });

        let response = match self
            .transport
            .post(AUTHENTICATE_PATH, &body, Some(&challenge.token))
            .await
        {
            Ok(response) => response,
            Err(GatewayError::Transport {
                status: Some(status),
                body,
            }) => return Err(classify_rejection(status, body)),
            Err(e) => return Err(e),
        };

        let text = response.text();
        if !text.eq_ignore_ascii_case(AUTH_SUCCESS) {
            return Err(classify_rejection(response.status, response.body));
        }

        info!(address = %address, "Authenticated with gateway");
        Ok(HandshakeState::Authenticated(Session {
            account_address: address,
            auth_token: challenge.token,
            created_at: Utc::now(),
        }))
    }

    /// Run the full handshake from scratch.
    pub async fn run(&self, identity: &Identity) -> Result<Session, GatewayError> {
        let joined = self.join(HandshakeState::Unauthenticated).await?;
        let challenged = self.sign_challenge(joined, identity)?;
        match self.authenticate(challenged).await? {
            HandshakeState::Authenticated(session) => Ok(session),
            other => Err(invalid_step("run", &other)),
        }
    }
}

fn invalid_step(step: &'static str, state: &HandshakeState) -> GatewayError {
    GatewayError::InvalidHandshakeState {
        step,
        state: state.name(),
    }
}

fn classify_rejection(status: u16, body: String) -> GatewayError {
    let lowered = body.to_ascii_lowercase();
    let stale = STALE_TOKEN_MARKERS.iter().any(|m| lowered.contains(m));

    match status {
        404 | 410 => GatewayError::ChallengeExpired(body),
        _ if stale => GatewayError::ChallengeExpired(body),
        401 | 403 => {
            warn!(status, "Gateway rejected challenge signature");
            GatewayError::AuthRejected(body)
        }
        200..=299 => GatewayError::AuthRejected(body),
        _ => GatewayError::Transport {
            status: Some(status),
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Simulator, SimulatorConfig};

    async fn setup() -> (Simulator, Handshake) {
        let sim = Simulator::spawn(SimulatorConfig::default()).await.unwrap();
        let transport = GatewayTransport::new(sim.network()).unwrap();
        (sim, Handshake::new(transport))
    }

    #[tokio::test]
    async fn full_handshake_reaches_authenticated() {
        let (sim, handshake) = setup().await;
        let identity = Identity::random();

        let joined = handshake.join(HandshakeState::Unauthenticated).await.unwrap();
        assert_eq!(joined.name(), "JOINED");
        let challenged = handshake.sign_challenge(joined, &identity).unwrap();
        assert_eq!(challenged.name(), "CHALLENGED");
        let authed = handshake.authenticate(challenged).await.unwrap();

        let session = authed.session().unwrap();
        assert_eq!(session.account_address, identity.address());
        assert_eq!(session.auth_token.len(), 40);

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn consumed_challenge_is_reported_stale() {
        let (sim, handshake) = setup().await;
        let identity = Identity::random();

        let joined = handshake.join(HandshakeState::Unauthenticated).await.unwrap();
        let challenged = handshake.sign_challenge(joined, &identity).unwrap();
        let replay = challenged.clone();

        handshake.authenticate(challenged).await.unwrap();
        let err = handshake.authenticate(replay).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChallengeExpired(_)), "{err:?}");

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn signature_for_another_address_is_rejected() {
        let (sim, handshake) = setup().await;
        let signer = Identity::random();
        let claimed = Identity::random();

        let joined = handshake.join(HandshakeState::Unauthenticated).await.unwrap();
        let HandshakeState::Challenged {
            challenge,
            signature,
            ..
        } = handshake.sign_challenge(joined, &signer).unwrap()
        else {
            panic!("expected challenged state");
        };
        let forged = HandshakeState::Challenged {
            challenge,
            address: claimed.address(),
            signature,
        };

        let err = handshake.authenticate(forged).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthRejected(_)), "{err:?}");

        // Restarting from scratch with the right identity still works.
        let session = handshake.run(&signer).await.unwrap();
        assert_eq!(session.account_address, signer.address());

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn stale_challenge_is_not_signed() {
        let (sim, handshake) = setup().await;
        let handshake = handshake.with_challenge_ttl(Duration::from_millis(1));

        let joined = handshake.join(HandshakeState::Unauthenticated).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = handshake
            .sign_challenge(joined, &Identity::random())
            .unwrap_err();
        assert!(matches!(err, GatewayError::ChallengeExpired(_)));

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn steps_out_of_order_are_refused() {
        let (sim, handshake) = setup().await;
        let identity = Identity::random();

        let err = handshake
            .sign_challenge(HandshakeState::Unauthenticated, &identity)
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidHandshakeState {
                step: "sign_challenge",
                state: "UNAUTHENTICATED"
            }
        ));

        let err = handshake
            .authenticate(HandshakeState::Unauthenticated)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidHandshakeState { .. }));

        let session = handshake.run(&identity).await.unwrap();
        let err = handshake
            .join(HandshakeState::Authenticated(session))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidHandshakeState { .. }));

        sim.shutdown().await;
    }

    #[test]
    fn rejection_classification() {
        assert!(matches!(
            classify_rejection(404, "token not found".into()),
            GatewayError::ChallengeExpired(_)
        ));
        assert!(matches!(
            classify_rejection(400, "token expired".into()),
            GatewayError::ChallengeExpired(_)
        ));
        assert!(matches!(
            classify_rejection(401, "signature mismatch".into()),
            GatewayError::AuthRejected(_)
        ));
        assert!(matches!(
            classify_rejection(200, "failure".into()),
            GatewayError::AuthRejected(_)
        ));
        assert!(matches!(
            classify_rejection(502, "bad gateway".into()),
            GatewayError::Transport {
                status: Some(502),
                ..
            }
        ));
    }

    #[test]
    fn require_session_before_authentication_fails() {
        assert!(matches!(
            HandshakeState::Unauthenticated.require_session(),
            Err(GatewayError::NotAuthenticated)
        ));
        assert!(!HandshakeState::default().is_authenticated());
    }
}
