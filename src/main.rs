// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use alloy::primitives::{
    utils::{format_ether, parse_ether},
    Address, U256,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gateway_harness::blockchain::{Environment, NetworkConfig, LOCAL_CHAIN_ID};
use gateway_harness::config::{
    JoinRateConfig, ScenarioConfig, StressConfig, DEFAULT_EXPIRATION_WAIT, DEFAULT_JOIN_REQUESTS,
    DEFAULT_JOIN_WORKERS, DEFAULT_KEYS_PER_USER, DEFAULT_RETURN_ADDRESS, DEFAULT_STRESS_USERS,
};
use gateway_harness::logging::init_tracing;
use gateway_harness::monitor::PollPolicy;
use gateway_harness::scenarios::{self, ScenarioError};
use gateway_harness::simulator::{Simulator, SimulatorConfig};

#[derive(Debug, Parser)]
#[command(
    name = "gateway-harness",
    version,
    about = "Exercise a Gateway deployment's session-key lifecycle"
)]
struct Cli {
    /// Gateway deployment (sepolia, dexynth, uat, local).
    #[arg(long, global = true, default_value = "local")]
    env: Environment,

    /// Override the environment's base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// How long to wait for an account to be funded.
    #[arg(long, global = true, default_value_t = 300)]
    funds_timeout_secs: u64,

    /// Balance polling interval.
    #[arg(long, global = true, default_value_t = 5)]
    poll_interval_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authenticate a fresh identity.
    BasicAuth,
    /// Create, query and delete a session key.
    BasicSessionKey,
    /// Fund a session key and check deletion returns the funds.
    ReturnOnDelete,
    /// Fund a session key and spend from it back to the owner.
    Transaction,
    /// Send a zero-value transfer from a funded session key.
    ZeroValue,
    /// Burst unauthenticated joins and count throttled responses.
    JoinRate {
        #[arg(long, default_value_t = DEFAULT_JOIN_REQUESTS)]
        requests: usize,
        #[arg(long, default_value_t = DEFAULT_JOIN_WORKERS)]
        workers: usize,
    },
    /// Fan funds out over many expiring session keys and check they return.
    Stress {
        #[arg(long, default_value_t = DEFAULT_STRESS_USERS)]
        users: usize,
        #[arg(long, default_value_t = DEFAULT_KEYS_PER_USER)]
        keys_per_user: usize,
        /// Session key lifetime; the gateway default when omitted.
        #[arg(long)]
        key_expiry_secs: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_EXPIRATION_WAIT.as_secs())]
        expiration_wait_secs: u64,
        #[arg(long, default_value_t = DEFAULT_RETURN_ADDRESS)]
        return_address: Address,
        /// Leave leftover funds in place instead of sweeping them to the return address.
        #[arg(long)]
        no_sweep: bool,
    },
    /// Serve an in-memory gateway until interrupted.
    Simulate {
        #[arg(long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,
        #[arg(long, default_value_t = LOCAL_CHAIN_ID)]
        chain_id: u64,
        #[arg(long, default_value_t = 1_000_000_000)]
        gas_price_wei: u128,
        /// Credit each newly authenticated account with this many ETH.
        #[arg(long, value_parser = parse_eth)]
        faucet_eth: Option<U256>,
        /// Lifetime of session keys created without an explicit expiry.
        #[arg(long)]
        default_key_expiry_secs: Option<u64>,
        /// Maximum joins served per second.
        #[arg(long)]
        join_rate_limit: Option<u32>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("Simulator failed: {0}")]
    Simulator(#[from] std::io::Error),
}

fn parse_eth(raw: &str) -> Result<U256, String> {
    parse_ether(raw.trim()).map_err(|e| format!("invalid ETH amount `{raw}`: {e}"))
}

impl Cli {
    fn network(&self) -> NetworkConfig {
        let network = self.env.network();
        match &self.base_url {
            Some(base_url) => network.with_base_url(base_url.clone()),
            None => network,
        }
    }

    fn scenario_config(&self) -> ScenarioConfig {
        let mut config = ScenarioConfig::new(self.network());
        config.funds = PollPolicy::new(
            Duration::from_secs(self.poll_interval_secs.max(1)),
            Duration::from_secs(self.funds_timeout_secs),
        );
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), CliError> {
    let config = cli.scenario_config();
    info!(
        network = config.network.name,
        base_url = %config.network.base_url,
        chain_id = config.network.chain_id,
        "Using gateway"
    );

    match cli.command {
        Command::BasicAuth => {
            let session = scenarios::basic_auth(&config).await?;
            println!("Authenticated {}", session.account_address);
        }
        Command::BasicSessionKey => {
            let key = scenarios::basic_session_key(&config).await?;
            println!("Session key {} created and deleted", key.address);
        }
        Command::ReturnOnDelete => {
            let report = scenarios::return_funds_on_delete(&config, cancel).await?;
            println!(
                "Session key {}: sent {}, returned {}, residual {} wei",
                report.session_key,
                format_ether(report.sent),
                format_ether(report.returned),
                report.residual
            );
        }
        Command::Transaction => {
            let report = scenarios::session_key_transaction(&config, cancel).await?;
            println!(
                "Session key {} spent {} in {} (block {})",
                report.session_key,
                format_ether(report.spent),
                report.tx_hash,
                report.block_number
            );
        }
        Command::ZeroValue => {
            let report = scenarios::zero_value_transaction(&config, cancel).await?;
            println!(
                "Zero-value transfer {} included in block {}",
                report.tx_hash, report.block_number
            );
        }
        Command::JoinRate { requests, workers } => {
            let join = JoinRateConfig {
                requests,
                workers,
                ..JoinRateConfig::default()
            };
            let report = scenarios::join_rate_limit(config.network, &join, cancel).await?;
            println!(
                "{} joins in {:?}: {} ok, {} rate limited, {} other",
                report.total(),
                report.elapsed,
                report.succeeded,
                report.rate_limited,
                report.other
            );
        }
        Command::Stress {
            users,
            keys_per_user,
            key_expiry_secs,
            expiration_wait_secs,
            return_address,
            no_sweep,
        } => {
            let stress = StressConfig {
                users,
                keys_per_user,
                key_expiry: key_expiry_secs.map(Duration::from_secs),
                expiration: PollPolicy::EXPIRATION
                    .with_timeout(Duration::from_secs(expiration_wait_secs)),
                return_address: (!no_sweep).then_some(return_address),
            };
            let report = scenarios::fund_expiration_stress(&config, &stress, cancel).await?;
            for user in &report.users {
                println!(
                    "{}: {} keys, sent {}, returned {}",
                    user.address,
                    user.keys.len(),
                    format_ether(user.sent),
                    format_ether(user.returned)
                );
            }
            println!("Swept {}", format_ether(report.swept));
        }
        Command::Simulate {
            listen,
            chain_id,
            gas_price_wei,
            faucet_eth,
            default_key_expiry_secs,
            join_rate_limit,
        } => {
            let sim = Simulator::bind(
                listen,
                SimulatorConfig {
                    chain_id,
                    gas_price: gas_price_wei,
                    auto_fund: faucet_eth,
                    default_key_expiry: default_key_expiry_secs.map(Duration::from_secs),
                    join_rate_limit,
                },
            )
            .await?;
            println!("Gateway simulator at {}", sim.base_url());
            cancel.cancelled().await;
            sim.shutdown().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faucet_amounts_parse_as_ether() {
        assert_eq!(
            parse_eth("1.5").unwrap(),
            U256::from(1_500_000_000_000_000_000u64)
        );
        assert_eq!(parse_eth(" 0.001 ").unwrap(), U256::from(1_000_000_000_000_000u64));
        assert!(parse_eth("1.2.3").is_err());
        assert!(parse_eth("abc").is_err());
    }

    #[test]
    fn cli_accepts_fractional_faucet_amounts() {
        let cli = Cli::try_parse_from(["gateway-harness", "simulate", "--faucet-eth", "0.25"]).unwrap();
        match cli.command {
            Command::Simulate { faucet_eth, .. } => {
                assert_eq!(faucet_eth, Some(U256::from(250_000_000_000_000_000u64)));
            }
            other => panic!("expected simulate, got {other:?}"),
        }
    }
}
