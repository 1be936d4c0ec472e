// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Fund Lifecycle Monitor
//!
//! Bounded polling for balance changes driven by the gateway: funds arriving
//! at an address, session keys expiring and returning their funds, and
//! transactions being included.
//!
//! ## Strategy
//!
//! Every wait runs the same loop: a `tokio::time::interval` ticks at the
//! poll interval and each tick issues one probe. The loop ends when
//! 1. the probe reports the condition satisfied,
//! 2. the deadline passes (a wait-specific deadline error),
//! 3. the cancellation token fires (`GatewayError::Cancelled`), or
//! 4. the probe fails with a non-retryable error.
//!
//! Transport and RPC failures are logged and polling continues. The deadline
//! also bounds an in-flight probe, so a hung request cannot stretch a wait.
//!
//! ## Concurrency
//!
//! The `spawn_*` variants run a wait as a task and hand back a
//! [`WaitHandle`] holding a child cancellation token and the task's join
//! handle. Dropping the handle cancels the task, so abandoned waits never
//! keep polling. A task that panics surfaces as `GatewayError::WaitAborted`.

use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blockchain::TxReceipt;
use crate::error::GatewayError;
use crate::gateway::{RpcClient, SessionKey, SessionKeyStatus, StatusTransition};

/// Polls between "still waiting" progress lines.
const PROGRESS_EVERY: u32 = 6;

/// Floor applied to the poll interval; a zero interval would spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Interval and deadline of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Raised to 10 ms when shorter.
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    /// Funds arrival: every 5 s for up to 5 minutes.
    pub const ARRIVAL: Self = Self::new(Duration::from_secs(5), Duration::from_secs(300));

    /// Session key expiration: every 10 s for up to 10 minutes.
    pub const EXPIRATION: Self = Self::new(Duration::from_secs(10), Duration::from_secs(600));

    /// Transaction inclusion: every 2 s for up to 1 minute.
    pub const RECEIPT: Self = Self::new(Duration::from_secs(2), Duration::from_secs(60));

    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Reads native balances.
pub trait BalanceProbe: Clone + Send + Sync + 'static {
    fn balance(&self, address: Address)
        -> impl Future<Output = Result<U256, GatewayError>> + Send;
}

/// Reads the caller's active session keys.
pub trait SessionKeyProbe: BalanceProbe {
    fn active_session_keys(&self)
        -> impl Future<Output = Result<Vec<Address>, GatewayError>> + Send;
}

/// Reads transaction receipts.
pub trait ReceiptProbe: Clone + Send + Sync + 'static {
    fn receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<TxReceipt>, GatewayError>> + Send;
}

impl BalanceProbe for RpcClient {
    async fn balance(&self, address: Address) -> Result<U256, GatewayError> {
        self.get_balance(address).await
    }
}

impl SessionKeyProbe for RpcClient {
    async fn active_session_keys(&self) -> Result<Vec<Address>, GatewayError> {
        self.list_session_keys().await
    }
}

impl ReceiptProbe for RpcClient {
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, GatewayError> {
        self.transaction_receipt(tx_hash).await
    }
}

/// Outcome of a successful expiration wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationReport {
    pub key_id: Uuid,
    pub address: Address,
    pub expired_at: DateTime<Utc>,
    /// Balance left on the key when the wait completed.
    pub residual_balance: U256,
    /// Status transitions observed during the wait.
    pub transitions: Vec<StatusTransition>,
}

/// One probe of a polling loop. `Ok(None)` means "not yet".
trait PollAttempt: Send {
    type Output: Send;

    fn attempt(&mut self)
        -> impl Future<Output = Result<Option<Self::Output>, GatewayError>> + Send;
}

struct FundsArrival<'a, P> {
    probe: &'a P,
    address: Address,
    threshold: U256,
}

impl<P: BalanceProbe> PollAttempt for FundsArrival<'_, P> {
    type Output = U256;

    async fn attempt(&mut self) -> Result<Option<U256>, GatewayError> {
        let balance = self.probe.balance(self.address).await?;
        Ok((balance > self.threshold).then_some(balance))
    }
}

struct KeyExpiration<'a, P> {
    probe: &'a P,
    key: &'a mut SessionKey,
    tolerance: U256,
    transitions: Vec<StatusTransition>,
}

impl<P: SessionKeyProbe> PollAttempt for KeyExpiration<'_, P> {
    type Output = U256;

    async fn attempt(&mut self) -> Result<Option<U256>, GatewayError> {
        if self.key.is_active() {
            let active = self.probe.active_session_keys().await?;
            if active.contains(&self.key.address) {
                return Ok(None);
            }
            if let Some(transition) = self.key.apply_status(SessionKeyStatus::Expired) {
                info!(
                    key_id = %transition.key_id,
                    session_key = %transition.address,
                    "Session key expired"
                );
                self.transitions.push(transition);
            }
        }

        let balance = self.probe.balance(self.key.address).await?;
        self.key.balance = balance;
        if balance > self.tolerance {
            debug!(
                session_key = %self.key.address,
                balance_wei = %balance,
                "Expired key still holds funds"
            );
            return Ok(None);
        }
        Ok(Some(balance))
    }
}

struct ReceiptInclusion<'a, P> {
    probe: &'a P,
    tx_hash: B256,
}

impl<P: ReceiptProbe> PollAttempt for ReceiptInclusion<'_, P> {
    type Output = TxReceipt;

    async fn attempt(&mut self) -> Result<Option<TxReceipt>, GatewayError> {
        self.probe.receipt(self.tx_hash).await
    }
}

/// Drive `attempt` until it yields a value. `Ok(None)` means the deadline passed.
async fn poll_until<A: PollAttempt>(
    label: &'static str,
    policy: PollPolicy,
    cancel: &CancellationToken,
    attempt: &mut A,
) -> Result<Option<A::Output>, GatewayError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut ticker = tokio::time::interval(policy.interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = sleep_until(deadline) => return Ok(None),
            _ = ticker.tick() => {}
        }

        polls += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = sleep_until(deadline) => return Ok(None),
            outcome = attempt.attempt() => outcome,
        };

        match outcome {
            Ok(Some(value)) => {
                debug!(wait = label, polls, elapsed = ?started.elapsed(), "Wait satisfied");
                return Ok(Some(value));
            }
            Ok(None) => {
                if polls % PROGRESS_EVERY == 0 {
                    info!(
                        wait = label,
                        elapsed_secs = started.elapsed().as_secs(),
                        timeout_secs = policy.timeout.as_secs(),
                        "Still waiting"
                    );
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(wait = label, polls, error = %e, "Poll failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wait until `address` holds more than `threshold` wei. Returns the balance seen.
pub async fn wait_for_funds<P: BalanceProbe>(
    probe: &P,
    address: Address,
    threshold: U256,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<U256, GatewayError> {
    info!(
        address = %address,
        threshold_wei = %threshold,
        timeout_secs = policy.timeout.as_secs(),
        "Waiting for funds"
    );

    let mut attempt = FundsArrival {
        probe,
        address,
        threshold,
    };
    match poll_until("funds", policy, cancel, &mut attempt).await? {
        Some(balance) => {
            info!(address = %address, balance_wei = %balance, "Funds received");
            Ok(balance)
        }
        None => Err(GatewayError::FundsNotReceived {
            address,
            threshold,
            timeout: policy.timeout,
        }),
    }
}

/// Wait until the gateway drops `key` from its active list and the key's
/// balance has converged to at most `tolerance` wei.
///
/// The key's cached status and balance are updated as polling observes them.
pub async fn wait_for_expiration<P: SessionKeyProbe>(
    probe: &P,
    key: &mut SessionKey,
    tolerance: U256,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<ExpirationReport, GatewayError> {
    info!(
        key_id = %key.key_id,
        session_key = %key.address,
        expires_at = ?key.expires_at,
        timeout_secs = policy.timeout.as_secs(),
        "Waiting for session key expiration"
    );

    let address = key.address;
    let mut attempt = KeyExpiration {
        probe,
        key,
        tolerance,
        transitions: Vec::new(),
    };
    let outcome = poll_until("expiration", policy, cancel, &mut attempt).await?;
    let KeyExpiration {
        key, transitions, ..
    } = attempt;

    match outcome {
        Some(residual_balance) => Ok(ExpirationReport {
            key_id: key.key_id,
            address,
            expired_at: key.expired_at().unwrap_or_else(Utc::now),
            residual_balance,
            transitions,
        }),
        None => Err(GatewayError::ExpirationTimeout {
            address,
            timeout: policy.timeout,
        }),
    }
}

/// Wait for `tx_hash` to be included.
pub async fn wait_for_receipt<P: ReceiptProbe>(
    probe: &P,
    tx_hash: B256,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<TxReceipt, GatewayError> {
    let mut attempt = ReceiptInclusion { probe, tx_hash };
    poll_until("receipt", policy, cancel, &mut attempt)
        .await?
        .ok_or(GatewayError::ReceiptTimeout {
            tx_hash,
            timeout: policy.timeout,
        })
}

/// A wait running as its own task.
#[derive(Debug)]
pub struct WaitHandle<T> {
    task: JoinHandle<Result<T, GatewayError>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl<T> WaitHandle<T> {
    fn spawn<F>(parent: &CancellationToken, wait: impl FnOnce(CancellationToken) -> F) -> Self
    where
        F: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = parent.child_token();
        let task = tokio::spawn(wait(cancel.clone()));

        Self {
            task,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Stop this wait without touching sibling waits.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the wait's result.
    pub async fn join(self) -> Result<T, GatewayError> {
        let WaitHandle { task, _guard, .. } = self;
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(GatewayError::Cancelled),
            Err(e) => Err(GatewayError::WaitAborted(e.to_string())),
        }
    }
}

/// Run [`wait_for_funds`] in the background.
pub fn spawn_arrival_wait<P: BalanceProbe>(
    probe: P,
    address: Address,
    threshold: U256,
    policy: PollPolicy,
    parent: &CancellationToken,
) -> WaitHandle<U256> {
    WaitHandle::spawn(parent, move |cancel| async move {
        wait_for_funds(&probe, address, threshold, policy, &cancel).await
    })
}

/// Run [`wait_for_expiration`] in the background; the updated key comes back
/// with the report.
pub fn spawn_expiration_wait<P: SessionKeyProbe>(
    probe: P,
    mut key: SessionKey,
    tolerance: U256,
    policy: PollPolicy,
    parent: &CancellationToken,
) -> WaitHandle<(SessionKey, ExpirationReport)> {
    WaitHandle::spawn(parent, move |cancel| async move {
        let report = wait_for_expiration(&probe, &mut key, tolerance, policy, &cancel).await?;
        Ok((key, report))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::gateway::SessionKeyConfig;

    #[derive(Default)]
    struct FakeState {
        balances: HashMap<Address, U256>,
        active: Vec<Address>,
        receipts: HashMap<B256, TxReceipt>,
        transient_failures: u32,
        hard_failure: bool,
        balance_calls: u32,
    }

    #[derive(Clone, Default)]
    struct FakeChain {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeChain {
        fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }

        fn set_balance(&self, address: Address, amount: u64) {
            self.with(|s| s.balances.insert(address, U256::from(amount)));
        }
    }

    impl BalanceProbe for FakeChain {
        async fn balance(&self, address: Address) -> Result<U256, GatewayError> {
            self.with(|s| {
                s.balance_calls += 1;
                if s.hard_failure {
                    return Err(GatewayError::NotAuthenticated);
                }
                if s.transient_failures > 0 {
                    s.transient_failures -= 1;
                    return Err(GatewayError::connection("connection reset"));
                }
                Ok(s.balances.get(&address).copied().unwrap_or_default())
            })
        }
    }

    impl SessionKeyProbe for FakeChain {
        async fn active_session_keys(&self) -> Result<Vec<Address>, GatewayError> {
            Ok(self.with(|s| s.active.clone()))
        }
    }

    impl ReceiptProbe for FakeChain {
        async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, GatewayError> {
            Ok(self.with(|s| s.receipts.get(&tx_hash).cloned()))
        }
    }

    fn active_key(chain: &FakeChain) -> SessionKey {
        let key = SessionKey::new(
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            SessionKeyConfig::default(),
        );
        chain.with(|s| s.active.push(key.address));
        key
    }

    const ADDR: Address = Address::repeat_byte(0x01);

    #[derive(Clone)]
    struct CrashingChain;

    impl BalanceProbe for CrashingChain {
        async fn balance(&self, _address: Address) -> Result<U256, GatewayError> {
            panic!("balance backend crashed")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_polls_at_the_floor_and_still_times_out() {
        let chain = FakeChain::default();
        let policy = PollPolicy::new(Duration::ZERO, Duration::from_secs(1));

        let err = wait_for_funds(&chain, ADDR, U256::ZERO, policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::FundsNotReceived { .. }));
        let calls = chain.with(|s| s.balance_calls);
        assert!(calls > 1, "{calls}");
        assert!(calls <= 101, "{calls}");
    }

    #[tokio::test]
    async fn panicking_wait_is_not_reported_as_cancelled() {
        let handle = spawn_arrival_wait(
            CrashingChain,
            ADDR,
            U256::ZERO,
            PollPolicy::new(Duration::from_millis(10), Duration::from_secs(5)),
            &CancellationToken::new(),
        );

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, GatewayError::WaitAborted(_)), "{err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_wait_times_out_within_one_interval_of_the_deadline() {
        let chain = FakeChain::default();
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(2));
        let started = Instant::now();

        let err = wait_for_funds(&chain, ADDR, U256::ZERO, policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::FundsNotReceived { .. }));
        assert!(err.is_deadline_exceeded());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(3), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_wait_returns_once_balance_exceeds_threshold() {
        let chain = FakeChain::default();
        let funder = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            funder.set_balance(ADDR, 500);
        });

        let balance = wait_for_funds(
            &chain,
            ADDR,
            U256::from(100u64),
            PollPolicy::ARRIVAL,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(balance, U256::from(500u64));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_do_not_abort_the_wait() {
        let chain = FakeChain::default();
        chain.set_balance(ADDR, 1);
        chain.with(|s| s.transient_failures = 3);

        let balance = wait_for_funds(
            &chain,
            ADDR,
            U256::ZERO,
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(balance, U256::from(1u64));
        assert_eq!(chain.with(|s| s.balance_calls), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_failures_abort_immediately() {
        let chain = FakeChain::default();
        chain.with(|s| s.hard_failure = true);

        let err = wait_for_funds(
            &chain,
            ADDR,
            U256::ZERO,
            PollPolicy::ARRIVAL,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::NotAuthenticated));
        assert_eq!(chain.with(|s| s.balance_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_parent_stops_spawned_waits() {
        let chain = FakeChain::default();
        let root = CancellationToken::new();

        let first = spawn_arrival_wait(chain.clone(), ADDR, U256::ZERO, PollPolicy::ARRIVAL, &root);
        let second = spawn_arrival_wait(chain, ADDR, U256::ZERO, PollPolicy::ARRIVAL, &root);

        tokio::time::sleep(Duration::from_secs(7)).await;
        root.cancel();

        assert!(matches!(first.join().await, Err(GatewayError::Cancelled)));
        assert!(matches!(second.join().await, Err(GatewayError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_one_handle_leaves_siblings_running() {
        let chain = FakeChain::default();
        let root = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30));

        let cancelled = spawn_arrival_wait(chain.clone(), ADDR, U256::ZERO, policy, &root);
        let survivor = spawn_arrival_wait(chain.clone(), ADDR, U256::ZERO, policy, &root);

        cancelled.cancel();
        assert!(matches!(cancelled.join().await, Err(GatewayError::Cancelled)));

        chain.set_balance(ADDR, 7);
        assert_eq!(survivor.join().await.unwrap(), U256::from(7u64));
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn expiration_is_reported_exactly_once() {
        let chain = FakeChain::default();
        let mut key = active_key(&chain);
        chain.set_balance(key.address, 1_000);

        let gateway = chain.clone();
        let address = key.address;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            gateway.with(|s| s.active.clear());
            // Funds linger for several polls after the key leaves the list.
            tokio::time::sleep(Duration::from_secs(4)).await;
            gateway.set_balance(address, 0);
        });

        let report = wait_for_expiration(
            &chain,
            &mut key,
            U256::ZERO,
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].to, SessionKeyStatus::Expired);
        assert_eq!(report.residual_balance, U256::ZERO);
        assert_eq!(Some(report.expired_at), key.expired_at());
        assert_eq!(key.status(), SessionKeyStatus::Expired);
        assert!(chain.with(|s| s.balance_calls) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn key_that_never_expires_times_out() {
        let chain = FakeChain::default();
        let key = active_key(&chain);

        let handle = spawn_expiration_wait(
            chain,
            key,
            U256::ZERO,
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(5)),
            &CancellationToken::new(),
        );
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, GatewayError::ExpirationTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_wait_returns_inclusion() {
        let chain = FakeChain::default();
        let tx_hash = B256::repeat_byte(0x33);
        let miner = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            miner.with(|s| {
                s.receipts.insert(
                    tx_hash,
                    TxReceipt {
                        tx_hash,
                        block_number: 1,
                        gas_used: 21_000,
                        success: true,
                    },
                )
            });
        });

        let receipt = wait_for_receipt(&chain, tx_hash, PollPolicy::RECEIPT, &CancellationToken::new())
            .await
            .unwrap();
        assert!(receipt.success);

        let missing = wait_for_receipt(
            &chain,
            B256::ZERO,
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(3)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(missing, GatewayError::ReceiptTimeout { .. }));
    }
}
