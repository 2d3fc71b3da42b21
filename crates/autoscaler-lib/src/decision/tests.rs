//! Scenario tests for the decision pipeline
//!
//! These drive the deciders through tick sequences the controller would
//! produce and check the run-level properties: cooldown spacing,
//! round-robin dispatch, vote windows and both termination paths.

#[cfg(test)]
mod scenario_tests {
    use crate::decision::{
        DecisionPipeline, HoldReason, PeakPolicy, PeakTracker, ScaleDecision, ScalingDecider,
        ScalingPolicy, TerminationDecider, TerminationDecision, TerminationPolicy, TickAction,
    };
    use crate::models::Sample;

    const RATE: u64 = 1000;
    const PRODUCERS: usize = 3;

    fn pipeline() -> DecisionPipeline {
        DecisionPipeline::new(
            PeakTracker::new(PeakPolicy::default()),
            TerminationDecider::new(TerminationPolicy::default()).unwrap(),
            ScalingDecider::new(ScalingPolicy::default(), RATE, PRODUCERS).unwrap(),
        )
    }

    /// A sample where the consumer keeps up with the producers
    fn keeping_up(ts: i64, messages_in: f64) -> Sample {
        Sample::new(ts, messages_in, 100_000.0, 100_000.0)
    }

    /// A sample where the consumer lags well behind
    fn lagging(ts: i64, messages_in: f64) -> Sample {
        Sample::new(ts, messages_in, 100_000.0, 50_000.0)
    }

    #[test]
    fn test_bootstrap_scales_to_first_producer() {
        let mut pipeline = pipeline();

        let action = pipeline.evaluate(&keeping_up(1_000, 0.0));
        assert_eq!(
            action,
            TickAction::ScaleOut {
                producer: 0,
                decision: ScaleDecision::Bootstrap
            }
        );

        pipeline.commit(1_000);
        assert_eq!(pipeline.scaling().last_scaling_ms(), Some(1_000));
        assert_eq!(pipeline.scaling().commanded_rate(), RATE);
        assert_eq!(pipeline.scaling().current_producer(), 1);
    }

    #[test]
    fn test_cooldown_blocks_scale_out() {
        let mut pipeline = pipeline();
        pipeline.evaluate(&keeping_up(0, 0.0));
        pipeline.commit(0);

        let action = pipeline.evaluate(&keeping_up(1_000, 1000.0));
        assert!(matches!(
            action,
            TickAction::Hold(ScaleDecision::Hold(HoldReason::TimeCooldown { remaining_ms: 59_000 }))
        ));
        assert_eq!(pipeline.scaling().votes().collect::<Vec<_>>(), vec![true]);
    }

    #[test]
    fn test_k_of_n_admits_with_exactly_k_positives() {
        let mut decider = ScalingDecider::new(ScalingPolicy::default(), RATE, PRODUCERS).unwrap();
        decider.commit(0);

        // Nine votes inside the cooldown: two negative, seven positive
        for ts in 1..=2 {
            decider.should_scale(&lagging(ts, RATE as f64));
        }
        for ts in 3..=9 {
            decider.should_scale(&keeping_up(ts, RATE as f64));
        }
        assert_eq!(decider.window_len(), 9);

        // The tenth vote arrives as the cooldown ends
        let decision = decider.should_scale(&keeping_up(60_000, RATE as f64));
        assert_eq!(decision, ScaleDecision::ScaleOut { positives: 8 });
        assert_eq!(decider.window_len(), 9);
    }

    #[test]
    fn test_k_of_n_rejects_with_fewer_positives() {
        let mut decider = ScalingDecider::new(ScalingPolicy::default(), RATE, PRODUCERS).unwrap();
        decider.commit(0);

        for ts in 1..=3 {
            decider.should_scale(&lagging(ts, RATE as f64));
        }
        for ts in 4..=9 {
            decider.should_scale(&keeping_up(ts, RATE as f64));
        }

        let decision = decider.should_scale(&keeping_up(60_000, RATE as f64));
        assert_eq!(decision, ScaleDecision::Hold(HoldReason::VoteFailed { positives: 7 }));
        assert_eq!(decider.window_len(), 9);
    }

    #[test]
    fn test_window_filling_after_cooldown() {
        let mut decider = ScalingDecider::new(ScalingPolicy::default(), RATE, PRODUCERS).unwrap();
        decider.commit(0);

        let decision = decider.should_scale(&keeping_up(60_000, RATE as f64));
        assert_eq!(decision, ScaleDecision::Hold(HoldReason::WindowFilling { votes: 1 }));
    }

    #[test]
    fn test_rate_cooldown_retracts_saturation() {
        let mut pipeline = pipeline();
        pipeline.evaluate(&keeping_up(0, 0.0));
        pipeline.commit(0);

        // Input reaches the commanded rate: saturated
        pipeline.evaluate(&keeping_up(3_000, 990.0));
        assert!(pipeline.termination().is_saturated());

        // 10% shortfall against a 5% tolerance
        let action = pipeline.evaluate(&keeping_up(60_000, 900.0));
        match action {
            TickAction::Hold(ScaleDecision::Hold(HoldReason::RateShortfall {
                shortfall_percentage,
                retract_saturation,
            })) => {
                assert!((shortfall_percentage - 10.0).abs() < 1e-9);
                assert!(retract_saturation);
            }
            other => panic!("unexpected action: {:?}", other),
        }
        assert!(!pipeline.termination().is_saturated());
    }

    #[test]
    fn test_rate_cooldown_without_retraction() {
        let policy = ScalingPolicy {
            retract_saturation_on_shortfall: false,
            ..Default::default()
        };
        let mut pipeline = DecisionPipeline::new(
            PeakTracker::new(PeakPolicy::default()),
            TerminationDecider::new(TerminationPolicy::default()).unwrap(),
            ScalingDecider::new(policy, RATE, PRODUCERS).unwrap(),
        );
        pipeline.evaluate(&keeping_up(0, 0.0));
        pipeline.commit(0);
        pipeline.evaluate(&keeping_up(3_000, 990.0));

        let action = pipeline.evaluate(&keeping_up(60_000, 900.0));
        assert!(matches!(
            action,
            TickAction::Hold(ScaleDecision::Hold(HoldReason::RateShortfall { .. }))
        ));
        assert!(pipeline.termination().is_saturated());
    }

    #[test]
    fn test_small_shortfall_does_not_hold() {
        let mut decider = ScalingDecider::new(ScalingPolicy::default(), RATE, PRODUCERS).unwrap();
        decider.commit(0);

        // 4% shortfall stays inside the 5% tolerance
        let decision = decider.should_scale(&keeping_up(60_000, 960.0));
        assert_eq!(decision, ScaleDecision::Hold(HoldReason::WindowFilling { votes: 1 }));
    }

    #[test]
    fn test_peak_drop_terminates_in_either_phase() {
        for saturate_first in [false, true] {
            let mut peaks = PeakTracker::new(PeakPolicy::default());
            let mut decider = TerminationDecider::new(TerminationPolicy::default()).unwrap();

            let peak_sample = Sample::new(0, 1000.0, 1_000_000.0, 1_000_000.0);
            peaks.observe(&peak_sample);
            decider.should_terminate(&peak_sample, &peaks, if saturate_first { 1000.0 } else { 1e9 });
            assert_eq!(decider.is_saturated(), saturate_first);

            let dropped = Sample::new(1, 1000.0, 1_000_000.0, 850_000.0);
            peaks.observe(&dropped);
            let decision = decider.should_terminate(&dropped, &peaks, 1000.0);

            match decision {
                TerminationDecision::PeakDrop {
                    peak,
                    current,
                    drop_percentage,
                } => {
                    assert_eq!(peak, 1_000_000.0);
                    assert_eq!(current, 850_000.0);
                    assert!((drop_percentage - 15.0).abs() < 1e-9);
                }
                other => panic!("unexpected decision: {:?}", other),
            }

            // Replaying the same sample keeps the verdict
            assert!(decider.should_terminate(&dropped, &peaks, 1000.0).is_terminate());
        }
    }

    #[test]
    fn test_small_drop_does_not_terminate() {
        let mut peaks = PeakTracker::new(PeakPolicy::default());
        let mut decider = TerminationDecider::new(TerminationPolicy::default()).unwrap();

        peaks.observe(&Sample::new(0, 0.0, 1_000_000.0, 1_000_000.0));
        let sample = Sample::new(1, 0.0, 1_000_000.0, 910_000.0);
        let decision = decider.should_terminate(&sample, &peaks, 1e9);
        assert_eq!(decision, TerminationDecision::Continue);
    }

    #[test]
    fn test_two_phase_stability_terminates() {
        let peaks = PeakTracker::new(PeakPolicy::default());
        let mut decider = TerminationDecider::new(TerminationPolicy::default()).unwrap();
        let commanded = 1000.0;
        let mut ts = 0;
        let mut tick = |decider: &mut TerminationDecider, bytes_out: f64| {
            ts += 1;
            decider.should_terminate(&Sample::new(ts, 990.0, 1e6, bytes_out), &peaks, commanded)
        };

        // Phase transition tick never terminates
        assert_eq!(tick(&mut decider, 500_000.0), TerminationDecision::Continue);
        assert!(decider.is_saturated());

        for _ in 0..5 {
            assert_eq!(tick(&mut decider, 501_000.0), TerminationDecision::Continue);
        }
        assert_eq!(decider.stable_count(), 5);

        // A 20% jump resets the run
        assert_eq!(tick(&mut decider, 600_000.0), TerminationDecision::Continue);
        assert_eq!(decider.stable_count(), 0);

        for _ in 0..9 {
            assert_eq!(tick(&mut decider, 600_000.0), TerminationDecision::Continue);
        }
        assert_eq!(tick(&mut decider, 600_000.0), TerminationDecision::Stable { ticks: 10 });

        // Replay stays terminal
        assert!(tick(&mut decider, 600_000.0).is_terminate());
    }

    #[test]
    fn test_long_run_invariants() {
        let mut pipeline = pipeline();
        let mut scale_out_times = Vec::new();
        let mut producers = Vec::new();
        let mut bytes = 10_000.0;

        for i in 0..400i64 {
            let ts = i * 3_000;
            // Output grows 6% per tick: never stable, never below its peak
            bytes *= 1.06;
            let commanded = pipeline.scaling().commanded_rate() as f64;
            let sample = Sample::new(ts, commanded, bytes, bytes);

            let peaks_before = (
                pipeline.peaks().max_messages_in(),
                pipeline.peaks().max_bytes_in(),
                pipeline.peaks().max_bytes_out(),
            );

            match pipeline.evaluate(&sample) {
                TickAction::ScaleOut { producer, .. } => {
                    producers.push(producer);
                    scale_out_times.push(ts);
                    pipeline.commit(ts);
                }
                TickAction::Hold(_) => {}
                TickAction::Terminate(decision) => panic!("unexpected termination: {:?}", decision),
            }

            let peaks = pipeline.peaks();
            assert!(peaks.max_messages_in() >= peaks_before.0);
            assert!(peaks.max_bytes_in() >= peaks_before.1);
            assert!(peaks.max_bytes_out() >= peaks_before.2);
            assert!(peaks.max_bytes_out() <= peaks.max_bytes_in() * 1.15);
            assert!(pipeline.scaling().current_producer() < PRODUCERS);
            assert!(pipeline.scaling().window_len() <= 10);
        }

        assert!(scale_out_times.len() > 3);
        for pair in scale_out_times.windows(2) {
            assert!(pair[1] - pair[0] >= 60_000);
        }
        for (i, producer) in producers.iter().enumerate() {
            assert_eq!(*producer, i % PRODUCERS);
        }
        assert_eq!(
            pipeline.scaling().commanded_rate(),
            scale_out_times.len() as u64 * RATE
        );
    }
}
