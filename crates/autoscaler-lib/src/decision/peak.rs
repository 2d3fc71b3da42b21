//! Running throughput peaks

use super::PeakPolicy;
use crate::models::Sample;
use tracing::debug;

/// Running maxima of the three throughput metrics.
///
/// The bytes-out peak only moves when the candidate stays within
/// `bytes_inout_diff_percentage` of the bytes-in peak, so a transient
/// out-rate overshoot from broker-side rate smoothing cannot anchor it.
#[derive(Debug, Clone, Default)]
pub struct PeakTracker {
    max_messages_in: f64,
    max_bytes_in: f64,
    max_bytes_out: f64,
    policy: PeakPolicy,
}

impl PeakTracker {
    pub fn new(policy: PeakPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Fold one sample into the peaks.
    pub fn observe(&mut self, sample: &Sample) {
        self.max_messages_in = self.max_messages_in.max(sample.messages_in_per_sec);
        self.max_bytes_in = self.max_bytes_in.max(sample.bytes_in_per_sec);

        let candidate = sample.bytes_out_per_sec;
        if candidate > self.max_bytes_out {
            if candidate <= self.bytes_out_ceiling() {
                self.max_bytes_out = candidate;
            } else {
                debug!(
                    bytes_out_per_sec = candidate,
                    ceiling = self.bytes_out_ceiling(),
                    "Rejected implausible bytes-out peak"
                );
            }
        }
    }

    /// Highest bytes-out value the peak may take
    fn bytes_out_ceiling(&self) -> f64 {
        self.max_bytes_in * (100.0 + self.policy.bytes_inout_diff_percentage as f64) / 100.0
    }

    pub fn max_messages_in(&self) -> f64 {
        self.max_messages_in
    }

    pub fn max_bytes_in(&self) -> f64 {
        self.max_bytes_in
    }

    pub fn max_bytes_out(&self) -> f64 {
        self.max_bytes_out
    }
}
