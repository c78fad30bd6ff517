//! Metrics registry containing all observability metrics for the front desk
//! service.
//!
//! Uses lock-free atomics and concurrent hashmaps for per-sequence-type
//! breakdowns.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::Histogram;

/// Central registry for all front desk observability metrics.
#[derive(Default)]
pub struct MetricsRegistry {
    /// HTTP API metrics with latency histograms
    pub api: Arc<ApiMetrics>,
    /// Sequence issuance metrics
    pub sequence: Arc<SequenceMetrics>,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all metric categories initialized.
    pub fn new() -> Self {
        Self {
            api: Arc::new(ApiMetrics::default()),
            sequence: Arc::new(SequenceMetrics::default()),
        }
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(8192);
        output.push_str(&self.api.format_prometheus());
        output.push_str(&self.sequence.format_prometheus());
        output
    }
}

/// HTTP API metrics with histograms and per-route breakdowns.
#[derive(Default)]
pub struct ApiMetrics {
    /// Write-path (create/update/delete) latency histogram
    pub write_latency_us: Histogram,
    /// Read-path (list/stats) latency histogram
    pub read_latency_us: Histogram,
    /// Requests per route
    pub requests_by_route: DashMap<String, AtomicU64>,
    /// Total requests rejected for a missing or wrong API key
    pub auth_rejections_total: AtomicU64,
    /// Total requests that ended in an error response
    pub errors_total: AtomicU64,
}

impl ApiMetrics {
    /// Records a write-path request.
    #[inline]
    pub fn record_write(&self, route: &str, latency_us: u64) {
        self.write_latency_us.observe(latency_us);
        self.requests_by_route
            .entry(route.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a read-path request.
    #[inline]
    pub fn record_read(&self, route: &str, latency_us: u64) {
        self.read_latency_us.observe(latency_us);
        self.requests_by_route
            .entry(route.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records an authentication rejection.
    #[inline]
    pub fn record_auth_rejection(&self) {
        self.auth_rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an error response.
    #[inline]
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Formats API metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        output.push_str(&self.write_latency_us.format_prometheus(
            "frontdesk_write_latency_us",
            "Write request latency histogram in microseconds",
        ));
        output.push('\n');

        output.push_str(&self.read_latency_us.format_prometheus(
            "frontdesk_read_latency_us",
            "Read request latency histogram in microseconds",
        ));
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP frontdesk_requests_by_route_total Requests per route"
        );
        let _ = writeln!(output, "# TYPE frontdesk_requests_by_route_total counter");
        for entry in self.requests_by_route.iter() {
            let _ = writeln!(
                output,
                "frontdesk_requests_by_route_total{{route=\"{}\"}} {}",
                entry.key(),
                entry.value().load(Ordering::Relaxed)
            );
        }
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP frontdesk_auth_rejections_total Total requests rejected for a missing or wrong API key"
        );
        let _ = writeln!(output, "# TYPE frontdesk_auth_rejections_total counter");
        let _ = writeln!(
            output,
            "frontdesk_auth_rejections_total {}",
            self.auth_rejections_total.load(Ordering::Relaxed)
        );
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP frontdesk_errors_total Total requests that ended in an error response"
        );
        let _ = writeln!(output, "# TYPE frontdesk_errors_total counter");
        let _ = writeln!(
            output,
            "frontdesk_errors_total {}",
            self.errors_total.load(Ordering::Relaxed)
        );
        output.push('\n');

        output
    }
}

/// Metrics for sequence code issuance.
#[derive(Default)]
pub struct SequenceMetrics {
    /// Codes issued per sequence type tag ("RM", "REG")
    pub issued_by_type: DashMap<String, AtomicU64>,
    /// Total transactions retried after a lock conflict
    pub lock_retries_total: AtomicU64,
    /// Total issuances refused because the counter outgrew its width
    pub overflows_total: AtomicU64,
}

impl SequenceMetrics {
    /// Records a successfully issued code.
    #[inline]
    pub fn record_issued(&self, tag: &str) {
        self.issued_by_type
            .entry(tag.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lock-conflict retry.
    #[inline]
    pub fn record_lock_retry(&self) {
        self.lock_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a refused issuance due to counter overflow.
    #[inline]
    pub fn record_overflow(&self) {
        self.overflows_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Formats sequence metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(1024);

        let _ = writeln!(
            output,
            "# HELP frontdesk_sequence_issued_total Codes issued per sequence type"
        );
        let _ = writeln!(output, "# TYPE frontdesk_sequence_issued_total counter");

        // Sort by tag for deterministic output
        let mut rows: Vec<(String, u64)> = self
            .issued_by_type
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (tag, count) in &rows {
            let _ = writeln!(
                output,
                "frontdesk_sequence_issued_total{{type=\"{}\"}} {}",
                tag, count
            );
        }
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP frontdesk_sequence_lock_retries_total Total transactions retried after a lock conflict"
        );
        let _ = writeln!(
            output,
            "# TYPE frontdesk_sequence_lock_retries_total counter"
        );
        let _ = writeln!(
            output,
            "frontdesk_sequence_lock_retries_total {}",
            self.lock_retries_total.load(Ordering::Relaxed)
        );
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP frontdesk_sequence_overflows_total Total issuances refused because the counter outgrew its width"
        );
        let _ = writeln!(output, "# TYPE frontdesk_sequence_overflows_total counter");
        let _ = writeln!(
            output,
            "frontdesk_sequence_overflows_total {}",
            self.overflows_total.load(Ordering::Relaxed)
        );
        output.push('\n');

        output
    }
}
