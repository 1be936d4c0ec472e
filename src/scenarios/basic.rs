// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use alloy::primitives::U256;
use tracing::info;

use super::{authenticated_client, verify, ScenarioResult};
use crate::config::ScenarioConfig;
use crate::gateway::{GatewayTransport, Session, SessionKey, SessionKeyConfig, SessionKeyStatus};

/// Authenticate a fresh identity and return its session.
pub async fn basic_auth(config: &ScenarioConfig) -> ScenarioResult<Session> {
    let transport = GatewayTransport::new(config.network.clone())?;
    let client = authenticated_client(&transport).await?;

    let session = client.state().require_session()?.clone();
    verify(session.account_address == client.address(), || {
        format!(
            "session bound to {} instead of {}",
            session.account_address,
            client.address()
        )
    })?;

    info!(
        address = %session.account_address,
        created_at = %session.created_at,
        "Basic auth succeeded"
    );
    Ok(session)
}

/// Create a session key, check it starts empty, then delete it.
pub async fn basic_session_key(config: &ScenarioConfig) -> ScenarioResult<SessionKey> {
    let transport = GatewayTransport::new(config.network.clone())?;
    let client = authenticated_client(&transport).await?;

    let mut key = client
        .create_session_key(&SessionKeyConfig::default())
        .await?;

    let balance = client
        .session_keys()
        .get_balance(client.state(), &mut key)
        .await?;
    verify(balance.is_zero(), || {
        format!("new session key {} already holds {balance} wei", key.address)
    })?;

    let listed = client
        .session_keys()
        .list_session_keys(client.state())
        .await?;
    verify(listed.contains(&key.address), || {
        format!("session key {} missing from the active list", key.address)
    })?;

    client.delete_session_key(&mut key).await?;
    verify(key.status() == SessionKeyStatus::Deleted, || {
        format!("session key {} is {} after delete", key.address, key.status())
    })?;

    let remaining = client.balance_of(key.address).await?;
    verify(remaining == U256::ZERO, || {
        format!("deleted session key {} still holds {remaining} wei", key.address)
    })?;

    info!(key_id = %key.key_id, session_key = %key.address, "Basic session key lifecycle passed");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::test_support::fast_config;
    use crate::simulator::{Simulator, SimulatorConfig};

    #[tokio::test]
    async fn basic_auth_binds_session_to_identity() {
        let sim = Simulator::spawn(SimulatorConfig::default()).await.unwrap();
        let session = basic_auth(&fast_config(&sim)).await.unwrap();
        assert_eq!(session.auth_token.len(), 40);
        sim.shutdown().await;
    }

    #[tokio::test]
    async fn basic_session_key_ends_deleted() {
        let sim = Simulator::spawn(SimulatorConfig::default()).await.unwrap();
        let key = basic_session_key(&fast_config(&sim)).await.unwrap();
        assert_eq!(key.status(), SessionKeyStatus::Deleted);
        assert_eq!(key.balance, U256::ZERO);
        sim.shutdown().await;
    }
}
