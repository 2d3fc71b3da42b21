//! Experiment termination decision
//!
//! Two criteria per tick: a peak-drop override, then a two-phase automaton
//! that waits for input to reach the commanded rate and afterwards counts
//! consecutive ticks of stable output.

use super::{PeakTracker, TerminationPolicy};
use crate::error::ScalerResult;
use crate::models::Sample;
use tracing::info;

/// Outcome of one termination evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationDecision {
    Continue,
    /// Output fell too far below its tracked peak
    PeakDrop {
        peak: f64,
        current: f64,
        drop_percentage: f64,
    },
    /// Output has been stable for the configured number of ticks
    Stable { ticks: u32 },
}

impl TerminationDecision {
    pub fn is_terminate(&self) -> bool {
        !matches!(self, TerminationDecision::Continue)
    }
}

/// Termination state machine
#[derive(Debug, Clone)]
pub struct TerminationDecider {
    policy: TerminationPolicy,
    saturated: bool,
    last_bytes_out: f64,
    stable_count: u32,
}

impl TerminationDecider {
    pub fn new(policy: TerminationPolicy) -> ScalerResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            saturated: false,
            last_bytes_out: 0.0,
            stable_count: 0,
        })
    }

    /// Decide whether the run should end after this sample.
    pub fn should_terminate(
        &mut self,
        sample: &Sample,
        peaks: &PeakTracker,
        commanded_rate: f64,
    ) -> TerminationDecision {
        let decision = self.evaluate(sample, peaks, commanded_rate);
        self.last_bytes_out = sample.bytes_out_per_sec;
        decision
    }

    fn evaluate(&mut self, sample: &Sample, peaks: &PeakTracker, commanded_rate: f64) -> TerminationDecision {
        let bytes_out = sample.bytes_out_per_sec;
        let peak = peaks.max_bytes_out();

        if bytes_out < peak {
            let drop_percentage = (peak - bytes_out) / peak * 100.0;
            if drop_percentage >= self.policy.bytes_out_drop_threshold_percentage as f64 {
                return TerminationDecision::PeakDrop {
                    peak,
                    current: bytes_out,
                    drop_percentage,
                };
            }
        }

        if !self.saturated {
            let entry = commanded_rate * (100.0 - self.policy.messages_in_threshold_percentage as f64) / 100.0;
            if sample.messages_in_per_sec > entry {
                self.saturated = true;
                info!(
                    event = "saturated",
                    messages_in_per_sec = sample.messages_in_per_sec,
                    commanded_rate = commanded_rate,
                    "Input reached commanded rate"
                );
            }
            return TerminationDecision::Continue;
        }

        let stable = self.last_bytes_out > 0.0
            && (self.last_bytes_out - bytes_out).abs() / self.last_bytes_out * 100.0
                < self.policy.bytes_out_threshold_percentage as f64;

        if stable {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }

        if self.stable_count >= self.policy.stable_ticks {
            TerminationDecision::Stable {
                ticks: self.stable_count,
            }
        } else {
            TerminationDecision::Continue
        }
    }

    /// Withdraw the saturation claim. The stable-tick count is kept; only a
    /// non-stable saturated tick resets it.
    pub fn retract_saturation(&mut self) {
        self.saturated = false;
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn last_bytes_out(&self) -> f64 {
        self.last_bytes_out
    }
}
