//! Per-round latency bookkeeping.
//!
//! Completions are kept in the order they were recorded, which is the order
//! the driver drained them from the transport. Nothing here re-sorts by
//! connection id; percentile math works on a sorted copy.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub connection_id: usize,
    pub at: Instant,
}

/// One measurement cycle.
#[derive(Debug, Clone)]
pub struct RoundResult {
    pub index: u64,
    pub started_at: Instant,
    pub completions: Vec<Completion>,
    pub failures: usize,
}

impl RoundResult {
    fn new(index: u64, started_at: Instant) -> Self {
        Self {
            index,
            started_at,
            completions: Vec::new(),
            failures: 0,
        }
    }

    fn offset(&self, completion: &Completion) -> Duration {
        completion.at.saturating_duration_since(self.started_at)
    }

    pub fn summarize(&self) -> Summary {
        let mut offsets: Vec<Duration> = self.completions.iter().map(|c| self.offset(c)).collect();
        offsets.sort_unstable();

        Summary {
            round: self.index,
            time_to_first: self.completions.first().map(|c| self.offset(c)),
            time_to_last: self.completions.last().map(|c| self.offset(c)),
            p50: percentile(&offsets, 0.50),
            p99: percentile(&offsets, 0.99),
            completions: self.completions.len(),
            failures: self.failures,
        }
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

/// Aggregate statistics for one round. Timing fields are `None` when the
/// round produced no completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub round: u64,
    pub time_to_first: Option<Duration>,
    pub time_to_last: Option<Duration>,
    pub p50: Option<Duration>,
    pub p99: Option<Duration>,
    pub completions: usize,
    pub failures: usize,
}

impl Summary {
    /// A round in which nothing completed.
    pub fn is_starved(&self) -> bool {
        self.completions == 0
    }
}

fn millis(d: Duration) -> String {
    format!("{:.3}ms", d.as_secs_f64() * 1000.0)
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.time_to_first, self.time_to_last) {
            (Some(first), Some(last)) => {
                write!(
                    f,
                    "round {}: first message after {}, all {} messages after {}",
                    self.round,
                    millis(first),
                    self.completions,
                    millis(last)
                )?;
                if let (Some(p50), Some(p99)) = (self.p50, self.p99) {
                    write!(f, " (p50 {}, p99 {})", millis(p50), millis(p99))?;
                }
                write!(f, ", {} failed", self.failures)
            }
            _ => write!(
                f,
                "round {}: no messages received, {} failed",
                self.round, self.failures
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct LatencyCollector {
    current: Option<RoundResult>,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_round(&mut self, index: u64) {
        self.begin_round_at(index, Instant::now());
    }

    /// Opens a round with an explicit start time. An unfinished round is
    /// discarded.
    pub fn begin_round_at(&mut self, index: u64, started_at: Instant) {
        if let Some(stale) = self.current.replace(RoundResult::new(index, started_at)) {
            warn!(round = stale.index, "Discarding unfinished round");
        }
    }

    pub fn is_round_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn record_completion(&mut self, connection_id: usize, at: Instant) {
        match self.current.as_mut() {
            Some(round) => round.completions.push(Completion { connection_id, at }),
            None => warn!(connection = connection_id, "Completion recorded outside a round"),
        }
    }

    pub fn record_failure(&mut self, connection_id: usize) {
        match self.current.as_mut() {
            Some(round) => round.failures += 1,
            None => warn!(connection = connection_id, "Failure recorded outside a round"),
        }
    }

    /// Completions of the open round, in recorded order.
    pub fn completions(&self) -> &[Completion] {
        self.current
            .as_ref()
            .map(|r| r.completions.as_slice())
            .unwrap_or_default()
    }

    /// Closes the open round and returns its summary, or `None` if no round
    /// was open.
    pub fn finish_round(&mut self) -> Option<Summary> {
        self.current.take().map(|round| round.summarize())
    }

    /// Drops the open round without summarizing it.
    pub fn abandon_round(&mut self) {
        self.current = None;
    }
}
