// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Scenarios
//!
//! End-to-end drivers exercising a gateway deployment. Each scenario owns
//! its identities, runs to completion or fails with a [`ScenarioError`], and
//! returns a small report for the CLI summary.
//!
//! | Scenario | Checks |
//! |----------|--------|
//! | `basic_auth` | join -> sign -> authenticate |
//! | `basic_session_key` | create, query, delete |
//! | `return_funds_on_delete` | deleting a funded key returns its balance |
//! | `session_key_transaction` | a funded key can spend back to its owner |
//! | `zero_value_transaction` | a zero-value spend is included |
//! | `join_rate_limit` | the join endpoint throttles bursts |
//! | `fund_expiration_stress` | many expiring keys return funds to their owners |

use alloy::primitives::{utils::format_ether, Address, U256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::blockchain::{GasEstimate, Identity, TRANSFER_GAS};
use crate::config::ScenarioConfig;
use crate::error::GatewayError;
use crate::gateway::{GatewayClient, GatewayTransport};
use crate::monitor::wait_for_funds;

pub mod basic;
pub mod rate_limit;
pub mod stress;
pub mod transfers;

pub use basic::{basic_auth, basic_session_key};
pub use rate_limit::{join_rate_limit, JoinRateReport};
pub use stress::{fund_expiration_stress, StressReport, UserOutcome};
pub use transfers::{
    return_funds_on_delete, session_key_transaction, zero_value_transaction, ReturnReport,
    SpendReport,
};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Insufficient funds at {address}: {available} wei cannot cover a transfer")]
    InsufficientFunds { address: Address, available: U256 },
}

pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Fail with `Verification(message)` unless `condition` holds.
pub(crate) fn verify(condition: bool, message: impl FnOnce() -> String) -> ScenarioResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Verification(message()))
    }
}

/// A fresh identity, authenticated against `transport`.
pub(crate) async fn authenticated_client(
    transport: &GatewayTransport,
) -> ScenarioResult<GatewayClient> {
    let mut client = GatewayClient::with_transport(transport.clone(), Identity::random());
    client.full_auth_flow().await?;
    info!(
        address = %client.address(),
        network = client.network().name,
        "Authenticated"
    );
    Ok(client)
}

/// Block until the client's owner account holds funds. Returns the balance.
pub(crate) async fn await_funding(
    client: &GatewayClient,
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<U256> {
    info!(
        address = %client.address(),
        "Fund this address to continue"
    );
    let balance = wait_for_funds(
        &client.rpc()?,
        client.address(),
        U256::ZERO,
        config.funds,
        cancel,
    )
    .await?;
    info!(address = %client.address(), balance = %format_ether(balance), "Owner funded");
    Ok(balance)
}

/// Current gas price and the gateway's estimate for a `value` transfer.
///
/// Estimation failures fall back to a plain transfer's gas.
pub(crate) async fn estimate_transfer(
    client: &GatewayClient,
    to: Address,
    value: U256,
) -> ScenarioResult<GasEstimate> {
    let rpc = client.rpc()?;
    let gas_price = rpc.gas_price().await?;
    let gas_limit = match rpc.estimate_gas(client.address(), to, value).await {
        Ok(limit) => limit,
        Err(e) => {
            warn!(error = %e, "Gas estimation failed, using transfer default");
            TRANSFER_GAS
        }
    };
    Ok(GasEstimate {
        gas_limit,
        gas_price,
    })
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::test_support::*;
    use super::*;
    use crate::monitor::PollPolicy;
    use crate::simulator::{Simulator, SimulatorConfig};

    #[test]
    fn verify_reports_the_message_only_on_failure() {
        assert!(verify(true, || unreachable!()).is_ok());
        let err = verify(false, || "balance too low".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Verification failed: balance too low");
    }

    #[tokio::test]
    async fn await_funding_sees_auto_funded_owner() {
        let sim = funded_simulator().await;
        let config = fast_config(&sim);
        let transport = GatewayTransport::new(config.network.clone()).unwrap();
        let client = authenticated_client(&transport).await.unwrap();

        let balance = await_funding(&client, &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(balance, U256::from(ONE_ETH));

        let gas = estimate_transfer(&client, Address::repeat_byte(0x01), U256::from(1u64))
            .await
            .unwrap();
        assert_eq!(gas, GasEstimate::transfer(sim.config().gas_price));

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn unfunded_owner_surfaces_the_deadline() {
        let sim = Simulator::spawn(SimulatorConfig::default()).await.unwrap();
        let mut config = fast_config(&sim);
        config.funds = PollPolicy::new(Duration::from_millis(50), Duration::from_millis(300));
        let transport = GatewayTransport::new(config.network.clone()).unwrap();
        let client = authenticated_client(&transport).await.unwrap();

        let err = await_funding(&client, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Gateway(GatewayError::FundsNotReceived { .. })
        ));

        sim.shutdown().await;
    }
}
