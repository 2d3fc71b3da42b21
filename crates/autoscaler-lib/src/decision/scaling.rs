//! Producer scale-out decision
//!
//! Evaluated once per tick, in order: bootstrap gate, vote registration,
//! time cooldown, message-rate cooldown, window-size gate, K-of-N vote.

use super::ScalingPolicy;
use crate::error::{ScalerError, ScalerResult};
use crate::models::Sample;
use std::collections::VecDeque;
use std::fmt;

/// Why a tick did not scale out
#[derive(Debug, Clone, PartialEq)]
pub enum HoldReason {
    /// Still inside the cooldown period of the last scale-out
    TimeCooldown { remaining_ms: i64 },
    /// Observed input trails the commanded rate
    RateShortfall {
        shortfall_percentage: f64,
        retract_saturation: bool,
    },
    /// Fewer than N votes recorded
    WindowFilling { votes: usize },
    /// Fewer than K positive votes in the window
    VoteFailed { positives: usize },
}

/// Outcome of one scale-out evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDecision {
    /// First tick of the run
    Bootstrap,
    /// The K-of-N vote passed
    ScaleOut { positives: usize },
    Hold(HoldReason),
}

impl ScaleDecision {
    pub fn is_scale_out(&self) -> bool {
        matches!(self, ScaleDecision::Bootstrap | ScaleDecision::ScaleOut { .. })
    }

    /// Whether this outcome withdraws the termination saturation claim
    pub fn retracts_saturation(&self) -> bool {
        matches!(
            self,
            ScaleDecision::Hold(HoldReason::RateShortfall {
                retract_saturation: true,
                ..
            })
        )
    }
}

impl fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDecision::Bootstrap => write!(f, "bootstrap"),
            ScaleDecision::ScaleOut { .. } => write!(f, "scale_out"),
            ScaleDecision::Hold(HoldReason::TimeCooldown { .. }) => write!(f, "time_cooldown"),
            ScaleDecision::Hold(HoldReason::RateShortfall { .. }) => write!(f, "rate_cooldown"),
            ScaleDecision::Hold(HoldReason::WindowFilling { .. }) => write!(f, "window_filling"),
            ScaleDecision::Hold(HoldReason::VoteFailed { .. }) => write!(f, "vote_failed"),
        }
    }
}

/// Producer scale-out state machine
#[derive(Debug, Clone)]
pub struct ScalingDecider {
    policy: ScalingPolicy,
    per_producer_rate: u64,
    producer_count: usize,
    /// Timestamp of the last committed scale-out; `None` before the first
    last_scaling_ms: Option<i64>,
    /// Most recent "consumer keeping up" votes, oldest first
    checks: VecDeque<bool>,
    current_producer: usize,
    commanded_rate: u64,
    scale_outs: u64,
}

impl ScalingDecider {
    pub fn new(policy: ScalingPolicy, per_producer_rate: u64, producer_count: usize) -> ScalerResult<Self> {
        policy.validate()?;
        if producer_count == 0 {
            return Err(ScalerError::BadConfig("at least one producer endpoint is required".to_string()));
        }
        if per_producer_rate == 0 {
            return Err(ScalerError::BadConfig("per-producer rate must be positive".to_string()));
        }

        Ok(Self {
            checks: VecDeque::with_capacity(policy.n + 1),
            policy,
            per_producer_rate,
            producer_count,
            last_scaling_ms: None,
            current_producer: 0,
            commanded_rate: 0,
            scale_outs: 0,
        })
    }

    /// Decide whether this tick should scale out.
    pub fn should_scale(&mut self, sample: &Sample) -> ScaleDecision {
        let last_scaling_ms = match self.last_scaling_ms {
            Some(ts) => ts,
            None => return ScaleDecision::Bootstrap,
        };

        // Votes are registered on every tick, cooldown included
        self.record_vote(sample);

        let cooldown_end = last_scaling_ms.saturating_add(self.policy.cooldown_period_ms);
        if sample.ts < cooldown_end {
            return ScaleDecision::Hold(HoldReason::TimeCooldown {
                remaining_ms: cooldown_end.saturating_sub(sample.ts),
            });
        }

        // commanded_rate > 0 here: a scale-out has been committed
        let commanded = self.commanded_rate as f64;
        if sample.messages_in_per_sec < commanded {
            let shortfall_percentage = (commanded - sample.messages_in_per_sec) / commanded * 100.0;
            if shortfall_percentage > self.policy.cooldown_threshold_percentage as f64 {
                return ScaleDecision::Hold(HoldReason::RateShortfall {
                    shortfall_percentage,
                    retract_saturation: self.policy.retract_saturation_on_shortfall,
                });
            }
        }

        if self.checks.len() < self.policy.n {
            return ScaleDecision::Hold(HoldReason::WindowFilling {
                votes: self.checks.len(),
            });
        }

        let positives = self.checks.iter().rev().take(self.policy.n).filter(|v| **v).count();
        self.checks.pop_front();

        if positives >= self.policy.k {
            ScaleDecision::ScaleOut { positives }
        } else {
            ScaleDecision::Hold(HoldReason::VoteFailed { positives })
        }
    }

    /// Append this tick's vote, keeping at most N entries
    fn record_vote(&mut self, sample: &Sample) {
        let keeping_up = sample.bytes_out_per_sec
            > sample.bytes_in_per_sec * (100.0 - self.policy.threshold_percentage as f64) / 100.0;
        self.checks.push_back(keeping_up);
        while self.checks.len() > self.policy.n {
            self.checks.pop_front();
        }
    }

    /// Record a dispatched scale-out.
    pub fn commit(&mut self, now_ms: i64) {
        self.last_scaling_ms = Some(now_ms);
        self.commanded_rate = self.commanded_rate.saturating_add(self.per_producer_rate);
        self.current_producer = (self.current_producer + 1) % self.producer_count;
        self.scale_outs += 1;
    }

    /// Producer that receives the next scale-out
    pub fn current_producer(&self) -> usize {
        self.current_producer
    }

    /// Sum of rates commanded so far
    pub fn commanded_rate(&self) -> u64 {
        self.commanded_rate
    }

    pub fn per_producer_rate(&self) -> u64 {
        self.per_producer_rate
    }

    pub fn scale_outs(&self) -> u64 {
        self.scale_outs
    }

    pub fn last_scaling_ms(&self) -> Option<i64> {
        self.last_scaling_ms
    }

    /// Votes currently in the window, oldest first
    pub fn votes(&self) -> impl Iterator<Item = bool> + '_ {
        self.checks.iter().copied()
    }

    pub fn window_len(&self) -> usize {
        self.checks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decider() -> ScalingDecider {
        ScalingDecider::new(ScalingPolicy::default(), 1000, 3).unwrap()
    }

    #[test]
    fn test_rejects_bad_construction() {
        assert!(ScalingDecider::new(ScalingPolicy::default(), 1000, 0).is_err());
        assert!(ScalingDecider::new(ScalingPolicy::default(), 0, 1).is_err());

        let policy = ScalingPolicy {
            k: 11,
            ..Default::default()
        };
        assert!(matches!(
            ScalingDecider::new(policy, 1000, 1),
            Err(ScalerError::BadConfig(_))
        ));
    }

    #[test]
    fn test_bootstrap_does_not_vote() {
        let mut decider = decider();
        let decision = decider.should_scale(&Sample::new(0, 0.0, 0.0, 0.0));

        assert_eq!(decision, ScaleDecision::Bootstrap);
        assert_eq!(decider.window_len(), 0);
    }

    #[test]
    fn test_bootstrap_at_timestamp_zero_fires_once() {
        let mut decider = decider();
        assert!(decider.should_scale(&Sample::new(0, 0.0, 0.0, 0.0)).is_scale_out());
        decider.commit(0);

        let decision = decider.should_scale(&Sample::new(1, 0.0, 0.0, 0.0));
        assert!(matches!(decision, ScaleDecision::Hold(HoldReason::TimeCooldown { .. })));
    }

    #[test]
    fn test_commit_round_robin() {
        let mut decider = decider();
        let producers: Vec<usize> = (0..7)
            .map(|i| {
                let current = decider.current_producer();
                decider.commit(i * 60_000);
                current
            })
            .collect();

        assert_eq!(producers, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(decider.commanded_rate(), 7 * 1000);
        assert_eq!(decider.scale_outs(), 7);
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let policy = ScalingPolicy {
            cooldown_period_ms: i64::MAX,
            ..Default::default()
        };
        let mut decider = ScalingDecider::new(policy, 1000, 1).unwrap();
        decider.commit(1_000);

        let decision = decider.should_scale(&Sample::new(2_000, 0.0, 0.0, 0.0));
        assert_eq!(
            decision,
            ScaleDecision::Hold(HoldReason::TimeCooldown {
                remaining_ms: i64::MAX - 2_000
            })
        );
    }

    #[test]
    fn test_commanded_rate_saturates() {
        let mut decider = ScalingDecider::new(ScalingPolicy::default(), u64::MAX, 2).unwrap();
        decider.commit(0);
        decider.commit(60_000);

        assert_eq!(decider.commanded_rate(), u64::MAX);
        assert_eq!(decider.scale_outs(), 2);
    }

    #[test]
    fn test_vote_threshold() {
        let mut decider = decider();
        decider.commit(0);

        // 970 is exactly 97% of 1000: not strictly above
        decider.should_scale(&Sample::new(1, 1000.0, 1000.0, 970.0));
        decider.should_scale(&Sample::new(2, 1000.0, 1000.0, 971.0));

        assert_eq!(decider.votes().collect::<Vec<_>>(), vec![false, true]);
    }

    #[test]
    fn test_window_capped_during_cooldown() {
        let mut decider = decider();
        decider.commit(0);

        for ts in 1..=25 {
            decider.should_scale(&Sample::new(ts, 1000.0, 1000.0, 1000.0));
            assert!(decider.window_len() <= 10);
        }
        assert_eq!(decider.window_len(), 10);
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(ScaleDecision::Bootstrap.to_string(), "bootstrap");
        assert_eq!(
            ScaleDecision::Hold(HoldReason::VoteFailed { positives: 3 }).to_string(),
            "vote_failed"
        );
    }
}
