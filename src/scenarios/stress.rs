// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Fund Expiration Stress
//!
//! A funder account spreads most of its balance over `users x keys_per_user`
//! session keys, each key owned by one of several freshly authenticated
//! users. The scenario then waits for every key to expire concurrently and
//! checks that each user got back at least the expiry tolerance of what its
//! keys held. Leftover funder and user funds are optionally swept to a
//! return address.
//!
//! A key whose residual stays above five times the allowance never completes
//! its wait and fails the run with `ExpirationTimeout`. A residual between
//! the allowance and that limit is logged as a warning.

use alloy::primitives::{utils::format_ether, Address, U256};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    authenticated_client, await_funding, estimate_transfer, verify, ScenarioError,
    ScenarioResult,
};
use crate::blockchain::transactions::{plan_return, plan_transfer};
use crate::blockchain::{GasEstimate, ReturnTolerance, TRANSFER_GAS};
use crate::config::{ScenarioConfig, StressConfig};
use crate::gateway::{GatewayClient, GatewayTransport, SessionKey, SessionKeyConfig};
use crate::monitor::{spawn_expiration_wait, wait_for_receipt};

/// Residual above `allowance * HARD_FAIL_FACTOR` keeps an expiration wait open.
const HARD_FAIL_FACTOR: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOutcome {
    pub address: Address,
    pub keys: Vec<Address>,
    /// Total funded into this user's keys.
    pub sent: U256,
    /// Owner balance increase observed after all keys expired.
    pub returned: U256,
    /// Largest balance left on any of the user's keys.
    pub max_residual: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressReport {
    pub funder: Address,
    pub users: Vec<UserOutcome>,
    /// Total swept to the return address, funder included.
    pub swept: U256,
}

struct StressUser {
    client: GatewayClient,
    keys: Vec<SessionKey>,
    balance_before: U256,
    outcome: UserOutcome,
}

pub async fn fund_expiration_stress(
    config: &ScenarioConfig,
    stress: &StressConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<StressReport> {
    let total_keys = stress.total_keys();
    verify(total_keys > 0, || {
        "stress run needs at least one user with one key".to_string()
    })?;

    let transport = GatewayTransport::new(config.network.clone())?;
    let funder = authenticated_client(&transport).await?;
    let funder_balance = await_funding(&funder, config, cancel).await?;

    let mut users = Vec::with_capacity(stress.users);
    for client in authenticate_users(&transport, stress.users).await? {
        let keys = create_keys(&client, stress).await?;
        let balance_before = client.get_balance().await?;
        let outcome = UserOutcome {
            address: client.address(),
            keys: keys.iter().map(|key| key.address).collect(),
            sent: U256::ZERO,
            returned: U256::ZERO,
            max_residual: U256::ZERO,
        };
        users.push(StressUser {
            client,
            keys,
            balance_before,
            outcome,
        });
    }

    let first_key = users
        .iter()
        .flat_map(|user| user.keys.iter())
        .map(|key| key.address)
        .next()
        .unwrap_or(Address::ZERO);
    let gas = estimate_transfer(&funder, first_key, funder_balance).await?;
    let per_key = per_key_amount(funder_balance, &gas, total_keys);
    if per_key.is_zero() {
        return Err(ScenarioError::InsufficientFunds {
            address: funder.address(),
            available: funder_balance,
        });
    }
    info!(
        keys = total_keys,
        per_key = %format_ether(per_key),
        "Funding session keys"
    );

    let mut pending = Vec::with_capacity(total_keys);
    for user in &mut users {
        for key in &user.keys {
            let receipt = funder
                .send_transaction(key.address, per_key, Some(gas.gas_limit), Some(gas.gas_price))
                .await?;
            pending.push(receipt.tx_hash);
            user.outcome.sent += per_key;
        }
    }
    let rpc = funder.rpc()?;
    for tx_hash in pending {
        let mined = wait_for_receipt(&rpc, tx_hash, config.receipt, cancel).await?;
        verify(mined.success, || {
            format!("funding transaction {tx_hash} reverted")
        })?;
    }

    await_expirations(&mut users, per_key, stress, cancel).await?;
    verify_returns(&mut users).await?;

    let swept = match stress.return_address {
        Some(return_address) => {
            let accounts: Vec<&GatewayClient> = std::iter::once(&funder)
                .chain(users.iter().map(|user| &user.client))
                .collect();
            sweep(&accounts, return_address, gas.gas_price, config, cancel).await?
        }
        None => U256::ZERO,
    };

    Ok(StressReport {
        funder: funder.address(),
        users: users.into_iter().map(|user| user.outcome).collect(),
        swept,
    })
}

/// Split what the funder can spare across `total_keys` transfers.
fn per_key_amount(balance: U256, gas: &GasEstimate, total_keys: usize) -> U256 {
    let count = total_keys as u64;
    let budget = GasEstimate {
        gas_limit: gas.gas_limit.saturating_mul(count),
        gas_price: gas.gas_price,
    };
    plan_transfer(balance, &budget) / U256::from(count.max(1))
}

/// Authenticate `count` fresh users concurrently, in a stable order.
async fn authenticate_users(
    transport: &GatewayTransport,
    count: usize,
) -> ScenarioResult<Vec<GatewayClient>> {
    let mut tasks = JoinSet::new();
    for index in 0..count {
        let transport = transport.clone();
        tasks.spawn(async move { (index, authenticated_client(&transport).await) });
    }

    let mut clients = Vec::with_capacity(count);
    while let Some(joined) = tasks.join_next().await {
        let (index, client) = joined
            .map_err(|e| ScenarioError::Verification(format!("user setup task failed: {e}")))?;
        clients.push((index, client?));
    }
    clients.sort_by_key(|(index, _)| *index);
    Ok(clients.into_iter().map(|(_, client)| client).collect())
}

async fn create_keys(
    client: &GatewayClient,
    stress: &StressConfig,
) -> ScenarioResult<Vec<SessionKey>> {
    let key_config = match stress.key_expiry {
        Some(expiry) => SessionKeyConfig::default().with_expiry(expiry),
        None => SessionKeyConfig::default(),
    };

    let mut keys = Vec::with_capacity(stress.keys_per_user);
    for _ in 0..stress.keys_per_user {
        keys.push(client.create_session_key(&key_config).await?);
    }
    Ok(keys)
}

/// Wait for every key to expire. The first failure cancels the remaining waits.
async fn await_expirations(
    users: &mut [StressUser],
    per_key: U256,
    stress: &StressConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<()> {
    let tolerance = ReturnTolerance::ON_EXPIRY;
    let allowance = tolerance.residual_allowance(per_key);
    let hard_limit = allowance * U256::from(HARD_FAIL_FACTOR);

    let mut handles = Vec::new();
    for (index, user) in users.iter_mut().enumerate() {
        let rpc = user.client.rpc()?;
        for key in user.keys.drain(..) {
            handles.push((
                index,
                spawn_expiration_wait(rpc.clone(), key, hard_limit, stress.expiration, cancel),
            ));
        }
    }
    info!(
        waits = handles.len(),
        timeout_secs = stress.expiration.timeout.as_secs(),
        "Waiting for session keys to expire"
    );

    for (index, handle) in handles {
        let (key, report) = handle.join().await?;
        let user = &mut users[index];

        if report.residual_balance > allowance {
            warn!(
                session_key = %report.address,
                residual_wei = %report.residual_balance,
                allowance_wei = %allowance,
                "Expired key kept more than the residual allowance"
            );
        }
        user.outcome.max_residual = user.outcome.max_residual.max(report.residual_balance);
        info!(
            owner = %user.outcome.address,
            session_key = %report.address,
            expired_at = %report.expired_at,
            "Session key expiry confirmed"
        );
        user.keys.push(key);
    }
    Ok(())
}

/// Check each user received its keys' funds back.
///
/// Expiry has already been confirmed, so the owner balance is read once.
async fn verify_returns(users: &mut [StressUser]) -> ScenarioResult<()> {
    for user in users.iter_mut() {
        let after = user.client.get_balance().await?;
        let returned = after.saturating_sub(user.balance_before);
        user.outcome.returned = returned;

        let address = user.outcome.address;
        let sent = user.outcome.sent;
        check_user_return(address, sent, returned)?;
        info!(
            user = %address,
            sent = %format_ether(sent),
            returned = %format_ether(returned),
            "Expired funds returned"
        );
    }
    Ok(())
}

fn check_user_return(address: Address, sent: U256, returned: U256) -> ScenarioResult<()> {
    let tolerance = ReturnTolerance::ON_EXPIRY;
    verify(tolerance.return_satisfied(sent, returned), || {
        format!(
            "user {address} got back {returned} wei of {sent} (minimum {})",
            tolerance.minimum_return(sent)
        )
    })
}

/// Move what each account can spare to `return_address`.
async fn sweep(
    accounts: &[&GatewayClient],
    return_address: Address,
    gas_price: u128,
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<U256> {
    let gas = GasEstimate::transfer(gas_price);
    let mut swept = U256::ZERO;

    for client in accounts {
        let balance = client.get_balance().await?;
        if balance <= gas.cost() {
            continue;
        }
        let amount = plan_return(balance, &gas);
        let receipt = client
            .send_transaction(return_address, amount, Some(TRANSFER_GAS), Some(gas_price))
            .await?;
        wait_for_receipt(&client.rpc()?, receipt.tx_hash, config.receipt, cancel).await?;
        info!(account = %client.address(), amount = %format_ether(amount), "Swept account");
        swept += amount;
    }

    info!(return_address = %return_address, swept = %format_ether(swept), "Swept remaining funds");
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::monitor::PollPolicy;
    use crate::scenarios::test_support::{fast_config, funded_simulator, ONE_ETH};

    #[test]
    fn per_key_amount_reserves_gas_for_every_transfer() {
        let balance = U256::from(1_000_000_000_000u64);
        let gas = GasEstimate::transfer(1);
        let per_key = per_key_amount(balance, &gas, 4);

        assert_eq!(per_key, balance * U256::from(95u64) / U256::from(100u64) / U256::from(4u64));
        assert!(per_key * U256::from(4u64) + gas.cost() * U256::from(4u64) <= balance);
        assert_eq!(per_key_amount(U256::from(10u64), &gas, 4), U256::ZERO);
    }

    #[test]
    fn missing_return_fails_verification_with_the_shortfall() {
        let user = Address::repeat_byte(0x0a);
        let sent = U256::from(1_000_000u64);

        let err = check_user_return(user, sent, U256::ZERO).unwrap_err();
        match err {
            ScenarioError::Verification(message) => {
                assert!(message.contains("got back 0 wei of 1000000"), "{message}");
            }
            other => panic!("expected verification failure, got {other:?}"),
        }
        assert!(check_user_return(user, sent, sent).is_ok());
    }

    #[tokio::test]
    async fn expiring_keys_return_funds_to_each_user() {
        let sim = funded_simulator().await;
        let return_address = Address::repeat_byte(0x5e);
        let stress = StressConfig {
            users: 2,
            keys_per_user: 2,
            key_expiry: Some(Duration::from_secs(2)),
            expiration: PollPolicy::new(Duration::from_millis(100), Duration::from_secs(15)),
            return_address: Some(return_address),
        };

        let report = fund_expiration_stress(&fast_config(&sim), &stress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.users.len(), 2);
        for user in &report.users {
            assert_eq!(user.keys.len(), 2);
            assert_eq!(user.max_residual, U256::ZERO);
            assert!(ReturnTolerance::ON_EXPIRY.return_satisfied(user.sent, user.returned));
        }
        assert!(report.swept > U256::ZERO);
        assert_eq!(sim.balance(return_address).await, report.swept);

        let funder_left = sim.balance(report.funder).await;
        assert!(funder_left <= U256::from(ONE_ETH / 1000), "{funder_left}");
        let returned = report
            .users
            .iter()
            .fold(U256::ZERO, |total, user| total + user.returned);
        assert!(report.swept > returned);

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn keys_that_outlive_the_window_fail_the_run() {
        let sim = funded_simulator().await;
        let stress = StressConfig {
            users: 1,
            keys_per_user: 1,
            key_expiry: Some(Duration::from_secs(3600)),
            expiration: PollPolicy::new(Duration::from_millis(50), Duration::from_millis(400)),
            return_address: None,
        };

        let err = fund_expiration_stress(&fast_config(&sim), &stress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Gateway(crate::error::GatewayError::ExpirationTimeout { .. })
        ));

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn empty_fan_out_is_rejected() {
        let sim = funded_simulator().await;
        let stress = StressConfig {
            users: 0,
            ..StressConfig::default()
        };
        let err = fund_expiration_stress(&fast_config(&sim), &stress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Verification(_)));
        sim.shutdown().await;
    }
}
