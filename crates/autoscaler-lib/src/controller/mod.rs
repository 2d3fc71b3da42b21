//! Controller tick loop
//!
//! One task owns every component: each tick samples the broker, emits the
//! status line, runs the decision pipeline, dispatches scale-outs and then
//! polls the control port. The bounded control-port accept sets the cadence.

mod r#loop;


pub use r#loop::{Controller, ControllerBuilder, RunSummary, StopReason};

use crate::decision::{DecisionPipeline, PeakTracker};
use crate::fanout::ProducerFanout;

/// What the controller does with each sample
pub enum RunMode {
    /// Track the broker metrics, scale producers and decide termination
    ///
    /// Each scale-out commands the decider's per-producer rate.
    Scaling {
        pipeline: DecisionPipeline,
        fanout: ProducerFanout,
    },
    /// Track the broker metrics only; scaling and termination are off
    MonitorOnly(PeakTracker),
    /// Sample an arbitrary list of metric specs
    Generic,
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            RunMode::Scaling { .. } => "scaling",
            RunMode::MonitorOnly(_) => "monitor",
            RunMode::Generic => "generic",
        }
    }
}

/// Source of wall-clock milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
