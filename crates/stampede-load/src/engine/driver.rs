//! Round orchestration.
//!
//! ```text
//! Idle --start--> RoundRunning --run_round--> RoundComplete --advance--> RoundRunning
//!                                                          \--advance--> Stopped
//! ```
//!
//! Everything runs on the caller's task. Receives for a round are polled
//! together through `FuturesUnordered`, so completions are recorded in the
//! order they resolve rather than in connection order.

use crate::engine::collector::{LatencyCollector, Summary};
use crate::engine::pool::{ConnectionPool, OpenReport};
use crate::engine::stamp::{Stamped, StampedOutput};
use crate::engine::transport::Connector;
use crate::error::{LoadError, ReceiveFailure};
use crate::metrics::LoadMetrics;
use futures_util::stream::{FuturesUnordered, StreamExt};
use stampede_common::{Config, Rounds};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    RoundRunning,
    RoundComplete,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of rounds finished.
    RoundLimit,
    /// The shutdown token fired.
    Cancelled,
    /// Every connection was retired after failing.
    PoolDrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub rounds_completed: u64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub url: String,
    pub connections: usize,
    pub rounds: Rounds,
    pub round_timeout: Option<Duration>,
    pub trigger_message: Option<String>,
}

impl DriverConfig {
    pub fn new(url: impl Into<String>, connections: usize) -> Self {
        Self {
            url: url.into(),
            connections,
            rounds: Rounds::Infinite,
            round_timeout: None,
            trigger_message: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.target_url(),
            connections: config.load.connections,
            rounds: config.load.rounds,
            round_timeout: config.load.round_timeout(),
            trigger_message: config.load.trigger_message.clone(),
        }
    }
}

/// Receives driver progress.
pub trait RoundObserver {
    fn connected(&mut self, _report: &OpenReport) {}

    fn round_finished(&mut self, summary: &Summary);
}

impl<F: FnMut(&Summary)> RoundObserver for F {
    fn round_finished(&mut self, summary: &Summary) {
        self(summary)
    }
}

pub struct LoadDriver<C: Connector> {
    config: DriverConfig,
    pool: ConnectionPool<C>,
    collector: LatencyCollector,
    state: DriverState,
    rounds_completed: u64,
    round_deadline: Option<Instant>,
    metrics: Option<LoadMetrics>,
    shutdown: CancellationToken,
}

impl<C: Connector> LoadDriver<C> {
    pub fn new(connector: C, config: DriverConfig) -> Self {
        Self {
            config,
            pool: ConnectionPool::new(connector),
            collector: LatencyCollector::new(),
            state: DriverState::Idle,
            rounds_completed: 0,
            round_deadline: None,
            metrics: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: LoadMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cancelling the returned token stops [`LoadDriver::run`] at the next
    /// suspension point.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    fn expect_state(&self, expected: DriverState, action: &'static str) -> Result<(), LoadError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LoadError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn enter_round(&mut self) {
        let now = Instant::now();
        self.round_deadline = self.config.round_timeout.map(|t| now + t);
        self.collector.begin_round_at(self.rounds_completed + 1, now);
        self.state = DriverState::RoundRunning;
    }

    /// Opens the connection pool and begins the first round.
    pub async fn start(&mut self) -> Result<OpenReport, LoadError> {
        self.expect_state(DriverState::Idle, "start")?;

        let report = match self.pool.open(&self.config.url, self.config.connections).await {
            Ok(report) => report,
            Err(e) => {
                self.state = DriverState::Stopped;
                return Err(e);
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_open(&report);
        }
        info!(
            opened = report.opened,
            failed = report.failed,
            "All clients connected"
        );

        self.enter_round();
        Ok(report)
    }

    /// Runs the current round to completion and returns its summary.
    ///
    /// Connections whose receive failed or timed out are retired before this
    /// returns.
    pub async fn run_round(&mut self) -> Result<Summary, LoadError> {
        self.expect_state(DriverState::RoundRunning, "run a round")?;

        let mut failed: Vec<usize> = Vec::new();

        if let Some(text) = self.config.trigger_message.as_deref() {
            if let Some(conn) = self.pool.active_mut().next() {
                let id = conn.id();
                let sent = match self.round_deadline {
                    Some(deadline) => match timeout_at(deadline, conn.send(text)).await {
                        Ok(sent) => sent.map_err(ReceiveFailure::from),
                        Err(_) => Err(ReceiveFailure::TimedOut),
                    },
                    None => conn.send(text).await.map_err(ReceiveFailure::from),
                };
                if let Err(failure) = sent {
                    warn!(connection = id, error = %failure, "Failed to send trigger message");
                    self.collector.record_failure(id);
                    failed.push(id);
                }
            }
        }

        let mut outstanding: HashSet<usize> = HashSet::new();
        let mut pending: FuturesUnordered<_> = self
            .pool
            .active_mut()
            .filter(|conn| !failed.contains(&conn.id()))
            .map(|conn| {
                let id = conn.id();
                outstanding.insert(id);
                Stamped::new(id, conn.recv())
            })
            .collect();

        let mut bytes_received = 0usize;
        loop {
            let next = match self.round_deadline {
                Some(deadline) => match timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => pending.next().await,
            };
            let Some(StampedOutput { id, at, value }) = next else {
                break;
            };
            outstanding.remove(&id);
            match value {
                Ok(payload) => {
                    bytes_received += payload.len();
                    self.collector.record_completion(id, at);
                }
                Err(e) => {
                    let failure = ReceiveFailure::from(e);
                    debug!(connection = id, error = %failure, "Receive failed");
                    self.collector.record_failure(id);
                    failed.push(id);
                }
            }
        }
        // Dropping the set cancels every receive still in flight.
        drop(pending);

        if !outstanding.is_empty() {
            let mut timed_out: Vec<usize> = outstanding.into_iter().collect();
            timed_out.sort_unstable();
            let failure = ReceiveFailure::TimedOut;
            warn!(
                timed_out = timed_out.len(),
                error = %failure,
                "Round timeout elapsed with receives pending"
            );
            for id in timed_out {
                self.collector.record_failure(id);
                failed.push(id);
            }
        }

        let Some(summary) = self.collector.finish_round() else {
            return Err(LoadError::InvalidState {
                action: "finish a round",
                state: self.state,
            });
        };

        self.pool.retire(&failed).await;
        self.rounds_completed += 1;
        self.state = DriverState::RoundComplete;

        if let Some(metrics) = &self.metrics {
            metrics.observe_round(&summary, self.pool.active_count());
            metrics.bytes_received.inc_by(bytes_received as u64);
        }
        if summary.is_starved() {
            warn!(
                round = summary.round,
                failures = summary.failures,
                "Round received no messages"
            );
        } else {
            debug!(
                round = summary.round,
                completions = summary.completions,
                failures = summary.failures,
                "Round complete"
            );
        }
        Ok(summary)
    }

    /// Moves on from a finished round: either begins the next one or stops.
    ///
    /// Returns the stop reason when the driver stopped.
    pub async fn advance(&mut self) -> Result<Option<StopReason>, LoadError> {
        self.expect_state(DriverState::RoundComplete, "advance")?;

        let reason = if self.config.rounds.is_reached(self.rounds_completed) {
            Some(StopReason::RoundLimit)
        } else if self.pool.active_count() == 0 {
            warn!(
                rounds = self.rounds_completed,
                "All connections lost; nothing left to measure"
            );
            Some(StopReason::PoolDrained)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.stop().await;
                Ok(Some(reason))
            }
            None => {
                self.enter_round();
                Ok(None)
            }
        }
    }

    /// Closes every connection and enters `Stopped`. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if self.state == DriverState::Stopped {
            return;
        }
        self.collector.abandon_round();
        self.pool.close_all().await;
        if let Some(metrics) = &self.metrics {
            metrics.active_connections.set(0);
        }
        self.state = DriverState::Stopped;
        info!(rounds = self.rounds_completed, "Load driver stopped");
    }

    /// Runs the full lifecycle until the round limit, cancellation, or the
    /// pool draining.
    pub async fn run<O: RoundObserver>(&mut self, observer: &mut O) -> Result<RunReport, LoadError> {
        let token = self.shutdown.clone();

        let started = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = self.start() => Some(res),
        };
        let Some(report) = started else {
            return Ok(self.finish(StopReason::Cancelled).await);
        };
        observer.connected(&report?);

        if self.config.rounds.is_reached(0) {
            return Ok(self.finish(StopReason::RoundLimit).await);
        }

        loop {
            let finished = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                res = self.run_round() => Some(res),
            };
            let Some(summary) = finished else {
                return Ok(self.finish(StopReason::Cancelled).await);
            };
            observer.round_finished(&summary?);

            if let Some(reason) = self.advance().await? {
                return Ok(RunReport {
                    rounds_completed: self.rounds_completed,
                    stop_reason: reason,
                });
            }
        }
    }

    async fn finish(&mut self, reason: StopReason) -> RunReport {
        self.stop().await;
        RunReport {
            rounds_completed: self.rounds_completed,
            stop_reason: reason,
        }
    }
}
