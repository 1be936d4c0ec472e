// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scenarios moving funds through a session key.
//!
//! Each one authenticates a fresh owner, waits for it to be funded, moves
//! most of the owner's balance into a new session key and then exercises one
//! way of getting the funds back.

use alloy::primitives::{utils::format_ether, Address, B256, U256};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    authenticated_client, await_funding, estimate_transfer, verify, ScenarioError,
    ScenarioResult,
};
use crate::blockchain::transactions::{plan_return, plan_transfer};
use crate::blockchain::{GasEstimate, ReturnTolerance, TxReceipt};
use crate::config::ScenarioConfig;
use crate::gateway::{GatewayClient, GatewayTransport, SessionKey, SessionKeyConfig};
use crate::monitor::{wait_for_funds, wait_for_receipt};

/// A funding transfer counts as delivered once 99 % of it shows on the key.
const KEY_FUNDING: ReturnTolerance = ReturnTolerance {
    min_return_bps: 9_900,
    residual_bps: 0,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnReport {
    pub session_key: Address,
    pub sent: U256,
    pub returned: U256,
    pub residual: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendReport {
    pub session_key: Address,
    pub funded: U256,
    pub spent: U256,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Fund a new key from the owner, delete it and check the balance comes back.
pub async fn return_funds_on_delete(
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<ReturnReport> {
    let transport = GatewayTransport::new(config.network.clone())?;
    let client = authenticated_client(&transport).await?;
    let (mut key, sent) = fund_new_session_key(&client, config, cancel).await?;

    let owner = client.address();
    let owner_before = client.get_balance().await?;
    client.delete_session_key(&mut key).await?;

    let owner_after =
        wait_for_funds(&client.rpc()?, owner, owner_before, config.receipt, cancel).await?;
    let returned = owner_after - owner_before;
    let residual = client.balance_of(key.address).await?;

    let tolerance = ReturnTolerance::ON_DELETE;
    verify(tolerance.residual_cleared(sent, residual), || {
        format!(
            "session key {} kept {residual} wei after delete (allowed {})",
            key.address,
            tolerance.residual_allowance(sent)
        )
    })?;
    verify(tolerance.return_satisfied(sent, returned), || {
        format!(
            "owner got back {returned} wei of {sent} (minimum {})",
            tolerance.minimum_return(sent)
        )
    })?;

    info!(
        session_key = %key.address,
        sent = %format_ether(sent),
        returned = %format_ether(returned),
        "Funds returned on delete"
    );
    Ok(ReturnReport {
        session_key: key.address,
        sent,
        returned,
        residual,
    })
}

/// Fund a new key and have it send most of the balance back to the owner.
pub async fn session_key_transaction(
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<SpendReport> {
    let transport = GatewayTransport::new(config.network.clone())?;
    let client = authenticated_client(&transport).await?;
    let (mut key, funded) = fund_new_session_key(&client, config, cancel).await?;

    let gas = GasEstimate::transfer(client.rpc()?.gas_price().await?);
    let amount = plan_return(key.balance, &gas);
    let mined = spend_and_confirm(&client, &mut key, amount, config, cancel).await?;

    client
        .session_keys()
        .delete_session_key_idempotent(client.state(), &mut key)
        .await?;

    Ok(SpendReport {
        session_key: key.address,
        funded,
        spent: amount,
        tx_hash: mined.tx_hash,
        block_number: mined.block_number,
    })
}

/// Fund a new key and have it send a zero-value transfer to the owner.
pub async fn zero_value_transaction(
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<SpendReport> {
    let transport = GatewayTransport::new(config.network.clone())?;
    let client = authenticated_client(&transport).await?;
    let (mut key, funded) = fund_new_session_key(&client, config, cancel).await?;

    let mined = spend_and_confirm(&client, &mut key, U256::ZERO, config, cancel).await?;

    client
        .session_keys()
        .delete_session_key_idempotent(client.state(), &mut key)
        .await?;

    Ok(SpendReport {
        session_key: key.address,
        funded,
        spent: U256::ZERO,
        tx_hash: mined.tx_hash,
        block_number: mined.block_number,
    })
}

/// Wait for the owner to be funded, create a key and move most of the
/// owner's balance into it. Returns the key and the amount sent.
async fn fund_new_session_key(
    client: &GatewayClient,
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<(SessionKey, U256)> {
    let owner_balance = await_funding(client, config, cancel).await?;
    let mut key = client
        .create_session_key(&SessionKeyConfig::default())
        .await?;

    let gas = estimate_transfer(client, key.address, owner_balance).await?;
    let amount = plan_transfer(owner_balance, &gas);
    if amount.is_zero() {
        return Err(ScenarioError::InsufficientFunds {
            address: client.address(),
            available: owner_balance,
        });
    }

    let receipt = client
        .send_transaction(key.address, amount, Some(gas.gas_limit), Some(gas.gas_price))
        .await?;
    let mined = wait_for_receipt(&client.rpc()?, receipt.tx_hash, config.receipt, cancel).await?;
    verify(mined.success, || {
        format!("funding transaction {} reverted", mined.tx_hash)
    })?;

    let key_balance = client
        .session_keys()
        .get_balance(client.state(), &mut key)
        .await?;
    verify(KEY_FUNDING.return_satisfied(amount, key_balance), || {
        format!(
            "session key {} holds {key_balance} wei after a {amount} wei transfer",
            key.address
        )
    })?;

    info!(
        session_key = %key.address,
        amount = %format_ether(amount),
        "Session key funded"
    );
    Ok((key, amount))
}

/// Send `amount` from `key` back to its owner and wait for inclusion.
async fn spend_and_confirm(
    client: &GatewayClient,
    key: &mut SessionKey,
    amount: U256,
    config: &ScenarioConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<TxReceipt> {
    let owner = key.owner;
    let receipt = client.send_as_session_key(key, owner, amount).await?;
    let mined = wait_for_receipt(&client.rpc()?, receipt.tx_hash, config.receipt, cancel).await?;
    verify(mined.success, || {
        format!("session key transaction {} reverted", mined.tx_hash)
    })?;

    info!(
        session_key = %key.address,
        tx_hash = %mined.tx_hash,
        block_number = mined.block_number,
        amount_wei = %amount,
        "Session key transaction included"
    );
    Ok(mined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::test_support::{fast_config, funded_simulator, ONE_ETH};

    #[tokio::test]
    async fn delete_returns_funds_within_tolerance() {
        let sim = funded_simulator().await;
        let report = return_funds_on_delete(&fast_config(&sim), &CancellationToken::new())
            .await
            .unwrap();

        let fee = U256::from(21_000u64) * U256::from(sim.config().gas_price);
        assert_eq!(report.returned, report.sent - fee);
        assert_eq!(report.residual, U256::ZERO);
        assert!(report.sent >= U256::from(ONE_ETH) * U256::from(94u64) / U256::from(100u64));

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn session_key_spends_back_to_owner() {
        let sim = funded_simulator().await;
        let report = session_key_transaction(&fast_config(&sim), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.spent > U256::ZERO && report.spent < report.funded);
        assert!(report.block_number >= 2);

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn zero_value_spend_is_included() {
        let sim = funded_simulator().await;
        let report = zero_value_transaction(&fast_config(&sim), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.spent, U256::ZERO);
        assert_ne!(report.tx_hash, B256::ZERO);

        sim.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_run_stops_while_waiting_for_funds() {
        let sim = crate::simulator::Simulator::spawn(Default::default())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = return_funds_on_delete(&fast_config(&sim), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Gateway(crate::error::GatewayError::Cancelled)
        ));

        sim.shutdown().await;
    }
}
