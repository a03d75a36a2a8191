use crate::engine::collector::Summary;
use crate::engine::pool::OpenReport;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus metrics owned by one driver.
///
/// Every instance has its own registry, so several drivers in one process do
/// not share counters.
#[derive(Clone)]
pub struct LoadMetrics {
    registry: Registry,
    pub active_connections: IntGauge,
    pub connect_failures: IntCounter,
    pub rounds: IntCounter,
    pub starved_rounds: IntCounter,
    pub completions: IntCounter,
    pub receive_failures: IntCounter,
    pub bytes_received: IntCounter,
    pub first_completion: Histogram,
    pub last_completion: Histogram,
}

fn latency_histogram(name: &str, help: &str) -> prometheus::Result<Histogram> {
    Histogram::with_opts(
        HistogramOpts::new(name, help).buckets(prometheus::exponential_buckets(0.0005, 2.0, 16)?),
    )
}

impl LoadMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let metrics = Self {
            registry: Registry::new(),
            active_connections: IntGauge::new(
                "stampede_active_connections",
                "Number of currently open load connections",
            )?,
            connect_failures: IntCounter::new(
                "stampede_connect_failures_total",
                "Total number of connection attempts that failed",
            )?,
            rounds: IntCounter::new("stampede_rounds_total", "Total number of finished rounds")?,
            starved_rounds: IntCounter::new(
                "stampede_starved_rounds_total",
                "Total number of rounds that received no message",
            )?,
            completions: IntCounter::new(
                "stampede_completions_total",
                "Total number of messages received across all rounds",
            )?,
            receive_failures: IntCounter::new(
                "stampede_receive_failures_total",
                "Total number of receives that failed or timed out",
            )?,
            bytes_received: IntCounter::new(
                "stampede_bytes_received_total",
                "Total payload bytes received",
            )?,
            first_completion: latency_histogram(
                "stampede_round_first_completion_seconds",
                "Time from round start to the first received message",
            )?,
            last_completion: latency_histogram(
                "stampede_round_last_completion_seconds",
                "Time from round start to the last received message",
            )?,
        };

        metrics.registry.register(Box::new(metrics.active_connections.clone()))?;
        metrics.registry.register(Box::new(metrics.connect_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.rounds.clone()))?;
        metrics.registry.register(Box::new(metrics.starved_rounds.clone()))?;
        metrics.registry.register(Box::new(metrics.completions.clone()))?;
        metrics.registry.register(Box::new(metrics.receive_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.bytes_received.clone()))?;
        metrics.registry.register(Box::new(metrics.first_completion.clone()))?;
        metrics.registry.register(Box::new(metrics.last_completion.clone()))?;
        Ok(metrics)
    }

    pub fn observe_open(&self, report: &OpenReport) {
        self.connect_failures.inc_by(report.failed as u64);
        self.active_connections.set(report.opened as i64);
    }

    pub fn observe_round(&self, summary: &Summary, active: usize) {
        self.rounds.inc();
        self.completions.inc_by(summary.completions as u64);
        self.receive_failures.inc_by(summary.failures as u64);
        self.active_connections.set(active as i64);
        if summary.is_starved() {
            self.starved_rounds.inc();
        }
        if let Some(first) = summary.time_to_first {
            self.first_completion.observe(first.as_secs_f64());
        }
        if let Some(last) = summary.time_to_last {
            self.last_completion.observe(last.as_secs_f64());
        }
    }

    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
    }
}
