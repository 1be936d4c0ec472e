// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ScenarioResult;
use crate::blockchain::NetworkConfig;
use crate::config::JoinRateConfig;
use crate::error::GatewayError;
use crate::gateway::handshake::JOIN_PATH;
use crate::gateway::GatewayTransport;

const STATUS_OK: u16 = 200;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Response tally of a join burst.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinRateReport {
    pub succeeded: usize,
    pub rate_limited: usize,
    /// Any other status, including connection failures.
    pub other: usize,
    pub elapsed: Duration,
}

impl JoinRateReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.rate_limited + self.other
    }

    fn record(&mut self, status: Option<u16>) {
        match status {
            Some(STATUS_OK) => self.succeeded += 1,
            Some(STATUS_TOO_MANY_REQUESTS) => self.rate_limited += 1,
            _ => self.other += 1,
        }
    }
}

/// Fire `config.requests` unauthenticated joins with at most `config.workers`
/// in flight and count how the gateway answered.
pub async fn join_rate_limit(
    network: NetworkConfig,
    config: &JoinRateConfig,
    cancel: &CancellationToken,
) -> ScenarioResult<JoinRateReport> {
    let transport = GatewayTransport::with_timeout(network, config.request_timeout)?;
    let permits = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut tasks = JoinSet::new();
    let started = Instant::now();

    info!(
        requests = config.requests,
        workers = config.workers,
        base_url = transport.base_url(),
        "Starting join burst"
    );

    for _ in 0..config.requests {
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(GatewayError::Cancelled.into());
            }
            permit = permits.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            break;
        };

        let transport = transport.clone();
        tasks.spawn(async move {
            let status = match transport.get(JOIN_PATH, None).await {
                Ok(response) => Some(response.status),
                Err(GatewayError::Transport { status, body }) => {
                    debug!(?status, body = %body, "Join request failed");
                    status
                }
                Err(e) => {
                    debug!(error = %e, "Join request failed");
                    None
                }
            };
            drop(permit);
            status
        });
    }

    let mut report = JoinRateReport::default();
    loop {
        let joined = tokio::select! {
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(GatewayError::Cancelled.into());
            }
            joined = tasks.join_next() => joined,
        };
        match joined {
            Some(Ok(status)) => report.record(status),
            Some(Err(e)) => {
                warn!(error = %e, "Join task failed");
                report.record(None);
            }
            None => break,
        }
    }
    report.elapsed = started.elapsed();

    info!(
        succeeded = report.succeeded,
        rate_limited = report.rate_limited,
        other = report.other,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Join burst finished"
    );
    Ok(report)
}
