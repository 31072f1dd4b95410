//! Metrics collection for observability

use crate::sanitizer::SanitizeReport;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramVec, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Sanitizer metrics
    pub sanitizer_runs: Counter,
    pub sanitizer_repairs: CounterVec,

    // Compaction metrics
    pub compaction_outcomes: CounterVec,
    pub compaction_tokens: HistogramVec,

    // Overflow metrics
    pub overflow_actions: CounterVec,
    pub overflow_artifacts_swept: Counter,
    pub overflow_response_bytes: Histogram,

    // File queue metrics
    pub file_queue_operations: CounterVec,
    pub file_queue_wait: Histogram,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sanitizer_runs = register_counter_with_registry!(
            Opts::new("sanitizer_runs_total", "Total request sanitizer runs"),
            registry
        )?;

        let sanitizer_repairs = register_counter_vec_with_registry!(
            Opts::new("sanitizer_repairs_total", "Protocol repairs applied by the sanitizer"),
            &["kind"],
            registry
        )?;

        let compaction_outcomes = register_counter_vec_with_registry!(
            Opts::new("compaction_outcomes_total", "Compaction decisions by outcome"),
            &["outcome"],
            registry
        )?;

        let compaction_tokens = register_histogram_vec_with_registry!(
            "compaction_tokens",
            "History token count before and after compaction",
            &["stage"],
            vec![1_000.0, 8_000.0, 32_000.0, 128_000.0, 256_000.0, 1_000_000.0, 2_000_000.0],
            registry
        )?;

        let overflow_actions = register_counter_vec_with_registry!(
            Opts::new("overflow_actions_total", "Tool results handled by the overflow guard"),
            &["action"],
            registry
        )?;

        let overflow_artifacts_swept = register_counter_with_registry!(
            Opts::new("overflow_artifacts_swept_total", "Overflow artifacts deleted by TTL sweep or cleanup"),
            registry
        )?;

        let overflow_response_bytes = register_histogram_with_registry!(
            "overflow_response_bytes",
            "Serialized size of guarded tool results",
            vec![1_000.0, 10_000.0, 100_000.0, 500_000.0, 1_000_000.0, 10_000_000.0],
            registry
        )?;

        let file_queue_operations = register_counter_vec_with_registry!(
            Opts::new("file_queue_operations_total", "Operations scheduled on the file queue"),
            &["mode"],
            registry
        )?;

        let file_queue_wait = register_histogram_with_registry!(
            "file_queue_wait_seconds",
            "Time an operation waited for earlier operations on its paths",
            registry
        )?;

        Ok(Self {
            registry,
            sanitizer_runs,
            sanitizer_repairs,
            compaction_outcomes,
            compaction_tokens,
            overflow_actions,
            overflow_artifacts_swept,
            overflow_response_bytes,
            file_queue_operations,
            file_queue_wait,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the repairs made by one sanitizer run
    pub fn record_sanitize_report(&self, report: &SanitizeReport) {
        self.sanitizer_runs.inc();
        let kinds = [
            ("arbitration_override", report.arbitration_overrides),
            ("id_realigned", report.ids_realigned),
            ("synthesized_cancellation", report.synthesized_cancellations),
            ("orphan_dropped", report.orphans_dropped),
            ("turn_merged", report.turns_merged),
        ];
        for (kind, count) in kinds {
            if count > 0 {
                self.sanitizer_repairs
                    .with_label_values(&[kind])
                    .inc_by(count as f64);
            }
        }
    }

    /// Record a compaction decision
    pub fn record_compaction(&self, outcome: &str, tokens: Option<(usize, usize)>) {
        self.compaction_outcomes.with_label_values(&[outcome]).inc();
        if let Some((before, after)) = tokens {
            self.compaction_tokens.with_label_values(&["before"]).observe(before as f64);
            self.compaction_tokens.with_label_values(&["after"]).observe(after as f64);
        }
    }

    /// Record how the overflow guard handled one tool result
    pub fn record_overflow(&self, action: &str, original_bytes: usize) {
        self.overflow_actions.with_label_values(&[action]).inc();
        self.overflow_response_bytes.observe(original_bytes as f64);
    }

    pub fn record_artifacts_swept(&self, count: usize) {
        if count > 0 {
            self.overflow_artifacts_swept.inc_by(count as f64);
        }
    }

    /// Record a file queue operation and how long it waited for its turn
    pub fn record_file_queue(&self, mode: &str, wait_secs: f64) {
        self.file_queue_operations.with_label_values(&[mode]).inc();
        self.file_queue_wait.observe(wait_secs);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
