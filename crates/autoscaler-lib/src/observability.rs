//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (throughput gauges, scale-out counters, sample latency)
//! - Structured logging of controller events with tracing

use crate::decision::{PeakTracker, ScaleDecision, TerminationDecision};
use crate::models::Sample;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Encoder, Gauge,
    Histogram, IntCounter, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for metric round-trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    messages_in_per_sec: Gauge,
    bytes_in_per_sec: Gauge,
    bytes_out_per_sec: Gauge,
    max_bytes_out_per_sec: Gauge,
    commanded_rate: IntGauge,
    saturated: IntGauge,
    scale_outs: IntCounter,
    dispatch_failures: IntCounter,
    ticks: IntCounter,
    sample_errors: IntCounter,
    sample_latency_seconds: Histogram,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            messages_in_per_sec: register_gauge!(
                "autoscaler_messages_in_per_sec",
                "Broker incoming message rate at the last tick"
            )
            .expect("Failed to register messages_in_per_sec"),

            bytes_in_per_sec: register_gauge!(
                "autoscaler_bytes_in_per_sec",
                "Broker incoming byte rate at the last tick"
            )
            .expect("Failed to register bytes_in_per_sec"),

            bytes_out_per_sec: register_gauge!(
                "autoscaler_bytes_out_per_sec",
                "Broker outgoing byte rate at the last tick"
            )
            .expect("Failed to register bytes_out_per_sec"),

            max_bytes_out_per_sec: register_gauge!(
                "autoscaler_max_bytes_out_per_sec",
                "Tracked peak of the outgoing byte rate"
            )
            .expect("Failed to register max_bytes_out_per_sec"),

            commanded_rate: register_int_gauge!(
                "autoscaler_commanded_rate",
                "Sum of the message rates commanded from producers"
            )
            .expect("Failed to register commanded_rate"),

            saturated: register_int_gauge!(
                "autoscaler_saturated",
                "1 while input has reached the commanded rate"
            )
            .expect("Failed to register saturated"),

            scale_outs: register_int_counter!(
                "autoscaler_scale_outs_total",
                "Total number of committed scale-outs"
            )
            .expect("Failed to register scale_outs_total"),

            dispatch_failures: register_int_counter!(
                "autoscaler_dispatch_failures_total",
                "Total number of rate commands that could not be delivered"
            )
            .expect("Failed to register dispatch_failures_total"),

            ticks: register_int_counter!(
                "autoscaler_ticks_total",
                "Total number of controller ticks"
            )
            .expect("Failed to register ticks_total"),

            sample_errors: register_int_counter!(
                "autoscaler_sample_errors_total",
                "Total number of failed metric samples"
            )
            .expect("Failed to register sample_errors_total"),

            sample_latency_seconds: register_histogram!(
                "autoscaler_sample_latency_seconds",
                "Round-trip time of one metric sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),
        }
    }
}

/// Autoscaler metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    /// Everything in the process registry in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Publish the throughput values of one tick
    pub fn observe_sample(&self, sample: &Sample) {
        let inner = self.inner();
        inner.messages_in_per_sec.set(sample.messages_in_per_sec);
        inner.bytes_in_per_sec.set(sample.bytes_in_per_sec);
        inner.bytes_out_per_sec.set(sample.bytes_out_per_sec);
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn set_max_bytes_out(&self, value: f64) {
        self.inner().max_bytes_out_per_sec.set(value);
    }

    /// Clamped to the gauge's `i64` range
    pub fn set_commanded_rate(&self, rate: u64) {
        self.inner()
            .commanded_rate
            .set(i64::try_from(rate).unwrap_or(i64::MAX));
    }

    pub fn set_saturated(&self, saturated: bool) {
        self.inner().saturated.set(saturated as i64);
    }

    pub fn inc_scale_outs(&self) {
        self.inner().scale_outs.inc();
    }

    pub fn inc_dispatch_failures(&self) {
        self.inner().dispatch_failures.inc();
    }

    pub fn inc_ticks(&self) {
        self.inner().ticks.inc();
    }

    pub fn inc_sample_errors(&self) {
        self.inner().sample_errors.inc();
    }
}

/// Structured logger for controller events
///
/// Every event carries the identity of the broker being driven.
#[derive(Clone)]
pub struct StructuredLogger {
    broker: String,
}

impl StructuredLogger {
    pub fn new(broker: impl Into<String>) -> Self {
        Self { broker: broker.into() }
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, mode: &str, endpoint: &str) {
        info!(
            event = "autoscaler_started",
            broker = %self.broker,
            version = %version,
            mode = %mode,
            endpoint = %endpoint,
            "Autoscaler started"
        );
    }

    /// Log a dispatched (or attempted) scale-out
    pub fn log_scale_out(
        &self,
        producer: usize,
        endpoint: &str,
        rate: u64,
        commanded_rate: u64,
        decision: &ScaleDecision,
        delivered: bool,
    ) {
        if delivered {
            info!(
                event = "scale_out",
                broker = %self.broker,
                producer = producer,
                endpoint = %endpoint,
                rate = rate,
                commanded_rate = commanded_rate,
                reason = %decision,
                "Scaled out producer load"
            );
        } else {
            warn!(
                event = "scale_out",
                broker = %self.broker,
                producer = producer,
                endpoint = %endpoint,
                rate = rate,
                commanded_rate = commanded_rate,
                reason = %decision,
                delivered = false,
                "Scale-out committed but rate command was not delivered"
            );
        }
    }

    /// Log why the run ends
    pub fn log_termination(&self, decision: &TerminationDecision) {
        match decision {
            TerminationDecision::PeakDrop {
                peak,
                current,
                drop_percentage,
            } => {
                info!(
                    event = "terminated",
                    broker = %self.broker,
                    reason = "peak_drop",
                    max_bytes_out_per_sec = peak,
                    bytes_out_per_sec = current,
                    drop_percentage = drop_percentage,
                    "Output dropped below its peak, ending run"
                );
            }
            TerminationDecision::Stable { ticks } => {
                info!(
                    event = "terminated",
                    broker = %self.broker,
                    reason = "stable",
                    stable_ticks = ticks,
                    "Output stable at commanded load, ending run"
                );
            }
            TerminationDecision::Continue => {}
        }
    }

    pub fn log_control_command(&self, command: &str) {
        info!(
            event = "control_command",
            broker = %self.broker,
            command = %command,
            "Control command received"
        );
    }

    /// Log the run summary
    pub fn log_peaks(&self, peaks: &PeakTracker, scale_outs: u64, commanded_rate: u64) {
        info!(
            event = "peak_summary",
            broker = %self.broker,
            max_messages_in_per_sec = peaks.max_messages_in(),
            max_bytes_in_per_sec = peaks.max_bytes_in(),
            max_bytes_out_per_sec = peaks.max_bytes_out(),
            scale_outs = scale_outs,
            commanded_rate = commanded_rate,
            "Run summary"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            broker = %self.broker,
            reason = %reason,
            "Autoscaler shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::PeakPolicy;

    #[test]
    fn test_scaler_metrics_shared_handle() {
        let metrics = ScalerMetrics::new();
        let clone = metrics.clone();

        metrics.observe_sample(&Sample::new(0, 1.0, 2.0, 3.0));
        metrics.observe_sample_latency(0.002);
        metrics.set_max_bytes_out(3.0);
        metrics.set_commanded_rate(1000);
        metrics.set_saturated(true);

        let before = clone.inner().ticks.get();
        clone.inc_ticks();
        // Other tests share the registry and may tick concurrently
        assert!(metrics.inner().ticks.get() > before);
    }

    #[test]
    fn test_commanded_rate_clamped() {
        let metrics = ScalerMetrics::new();
        metrics.set_commanded_rate(u64::MAX);
        // Concurrent tests only ever set small rates
        assert!(metrics.inner().commanded_rate.get() > 0);
    }

    #[test]
    fn test_encode_text_exposes_registry() {
        let metrics = ScalerMetrics::new();
        metrics.inc_ticks();

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("autoscaler_ticks_total"));
        assert!(text.contains("# TYPE autoscaler_sample_latency_seconds histogram"));
    }

    #[test]
    fn test_structured_logger_events() {
        let logger = StructuredLogger::new("kafka.Kafka");
        logger.log_termination(&TerminationDecision::Stable { ticks: 10 });
        logger.log_peaks(&PeakTracker::new(PeakPolicy::default()), 0, 0);
    }
}
