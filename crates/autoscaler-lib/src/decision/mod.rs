//! Scaling and termination decisions
//!
//! This module provides the per-tick decision procedures:
//! - Running throughput peaks with a bytes-out plausibility filter
//! - Producer scale-out (time cooldown, rate cooldown, K-of-N vote)
//! - Experiment termination (two-phase stability, peak-drop override)
//!
//! All state is owned by the caller's task; nothing here does I/O.

mod peak;
mod scaling;
mod termination;

#[cfg(test)]
mod tests;

pub use peak::PeakTracker;
pub use scaling::{HoldReason, ScaleDecision, ScalingDecider};
pub use termination::{TerminationDecider, TerminationDecision};

use crate::error::{ScalerError, ScalerResult};
use crate::models::Sample;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Plausibility filter for the bytes-out peak
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakPolicy {
    /// How far the bytes-out peak may exceed the bytes-in peak
    pub bytes_inout_diff_percentage: u32,
}

impl Default for PeakPolicy {
    fn default() -> Self {
        Self {
            bytes_inout_diff_percentage: 15,
        }
    }
}

/// Producer scale-out policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    /// Positive votes required in the window
    pub k: usize,
    /// Window length
    pub n: usize,
    /// Consumer-lag tolerance for a positive vote
    pub threshold_percentage: u32,
    /// Minimum time between scale-outs
    pub cooldown_period_ms: i64,
    /// Message-rate shortfall against the commanded rate that holds scaling
    pub cooldown_threshold_percentage: u32,
    /// Whether a rate shortfall also retracts the saturation claim
    pub retract_saturation_on_shortfall: bool,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            k: 8,
            n: 10,
            threshold_percentage: 3,
            cooldown_period_ms: 60_000,
            cooldown_threshold_percentage: 5,
            retract_saturation_on_shortfall: true,
        }
    }
}

impl ScalingPolicy {
    pub fn validate(&self) -> ScalerResult<()> {
        if self.n == 0 {
            return Err(ScalerError::BadConfig("scaling window n must be at least 1".to_string()));
        }
        if self.k == 0 || self.k > self.n {
            return Err(ScalerError::BadConfig(format!(
                "scaling vote k={} must lie in 1..={}",
                self.k, self.n
            )));
        }
        if self.threshold_percentage > 100 {
            return Err(ScalerError::BadConfig(
                "scaling threshold percentage must not exceed 100".to_string(),
            ));
        }
        if self.cooldown_period_ms < 0 {
            return Err(ScalerError::BadConfig("cooldown period must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Termination policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationPolicy {
    /// Distance from the commanded rate that counts as saturated
    pub messages_in_threshold_percentage: u32,
    /// Per-tick bytes-out change still considered stable
    pub bytes_out_threshold_percentage: u32,
    /// Drop from the bytes-out peak that ends the run
    pub bytes_out_drop_threshold_percentage: u32,
    /// Consecutive stable ticks that end the run
    pub stable_ticks: u32,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            messages_in_threshold_percentage: 3,
            bytes_out_threshold_percentage: 5,
            bytes_out_drop_threshold_percentage: 10,
            stable_ticks: 10,
        }
    }
}

impl TerminationPolicy {
    pub fn validate(&self) -> ScalerResult<()> {
        if self.stable_ticks == 0 {
            return Err(ScalerError::BadConfig("stable tick count must be at least 1".to_string()));
        }
        if self.messages_in_threshold_percentage > 100 {
            return Err(ScalerError::BadConfig(
                "messages-in threshold percentage must not exceed 100".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the controller should do after evaluating one sample
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// End the run
    Terminate(TerminationDecision),
    /// Dispatch one scale-out to the given producer, then commit
    ScaleOut { producer: usize, decision: ScaleDecision },
    /// Nothing to do this tick
    Hold(ScaleDecision),
}

/// Peak tracking, termination and scaling evaluated in tick order
pub struct DecisionPipeline {
    peaks: PeakTracker,
    termination: TerminationDecider,
    scaling: ScalingDecider,
}

impl DecisionPipeline {
    pub fn new(peaks: PeakTracker, termination: TerminationDecider, scaling: ScalingDecider) -> Self {
        Self {
            peaks,
            termination,
            scaling,
        }
    }

    /// Evaluate one sample: peaks first, then termination, then scaling.
    pub fn evaluate(&mut self, sample: &Sample) -> TickAction {
        self.peaks.observe(sample);

        let termination = self.termination.should_terminate(
            sample,
            &self.peaks,
            self.scaling.commanded_rate() as f64,
        );
        if termination.is_terminate() {
            return TickAction::Terminate(termination);
        }

        let decision = self.scaling.should_scale(sample);
        if decision.retracts_saturation() && self.termination.is_saturated() {
            info!(
                event = "saturation_retracted",
                messages_in_per_sec = sample.messages_in_per_sec,
                commanded_rate = self.scaling.commanded_rate(),
                "Input fell behind commanded rate, saturation retracted"
            );
            self.termination.retract_saturation();
        }

        if decision.is_scale_out() {
            TickAction::ScaleOut {
                producer: self.scaling.current_producer(),
                decision,
            }
        } else {
            TickAction::Hold(decision)
        }
    }

    /// Record a dispatched scale-out at `now_ms`.
    pub fn commit(&mut self, now_ms: i64) {
        self.scaling.commit(now_ms);
    }

    pub fn peaks(&self) -> &PeakTracker {
        &self.peaks
    }

    pub fn scaling(&self) -> &ScalingDecider {
        &self.scaling
    }

    pub fn termination(&self) -> &TerminationDecider {
        &self.termination
    }
}
