//! Autoscaler configuration

use anyhow::{bail, Context, Result};
use autoscaler_lib::decision::{PeakPolicy, ScalingPolicy, TerminationPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Autoscaler configuration
///
/// Built-in defaults, overridden by `AUTOSCALER_*` environment variables
/// (nested keys joined by `__`), overridden by command-line flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    /// Control port
    pub listen_port: u16,

    /// Control-port poll slice, which also sets the tick cadence
    pub accept_timeout_ms: u64,

    /// Command-line fragment identifying the broker in scaling mode
    pub broker_process: String,

    /// Metric endpoint used when the broker command line names none
    pub jolokia_url: String,

    /// Health/metrics HTTP port; 0 disables the endpoint
    pub metrics_port: u16,

    pub log_json: bool,

    pub scaling: ScalingPolicy,
    pub termination: TerminationPolicy,
    pub peaks: PeakPolicy,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            listen_port: 8888,
            accept_timeout_ms: 3000,
            broker_process: "kafka.Kafka".to_string(),
            jolokia_url: "http://127.0.0.1:8778/jolokia".to_string(),
            metrics_port: 0,
            log_json: false,
            scaling: ScalingPolicy::default(),
            termination: TerminationPolicy::default(),
            peaks: PeakPolicy::default(),
        }
    }
}

impl AutoscalerConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(environment())
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment)
            .build()
            .context("failed to read AUTOSCALER_* environment")?;

        config
            .try_deserialize()
            .context("invalid AUTOSCALER_* configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.accept_timeout_ms == 0 {
            bail!("accept_timeout_ms must be positive");
        }
        self.scaling.validate()?;
        self.termination.validate()?;
        Ok(())
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("AUTOSCALER")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> Result<AutoscalerConfig> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AutoscalerConfig::from_environment(environment().source(Some(source)))
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = load_from(&[]).unwrap();

        assert_eq!(config.listen_port, 8888);
        assert_eq!(config.accept_timeout(), Duration::from_secs(3));
        assert_eq!(config.broker_process, "kafka.Kafka");
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.scaling, ScalingPolicy::default());
        assert_eq!(config.termination.stable_ticks, 10);
        assert_eq!(config.peaks.bytes_inout_diff_percentage, 15);
        config.validate().unwrap();
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let config = load_from(&[
            ("AUTOSCALER_LISTEN_PORT", "9999"),
            ("AUTOSCALER_LOG_JSON", "true"),
            ("AUTOSCALER_SCALING__COOLDOWN_PERIOD_MS", "30000"),
            ("AUTOSCALER_TERMINATION__STABLE_TICKS", "5"),
        ])
        .unwrap();

        assert_eq!(config.listen_port, 9999);
        assert!(config.log_json);
        assert_eq!(config.scaling.cooldown_period_ms, 30_000);
        assert_eq!(config.scaling.k, 8);
        assert_eq!(config.termination.stable_ticks, 5);
    }

    #[test]
    fn test_validation_rejects_bad_vote() {
        let config = load_from(&[("AUTOSCALER_SCALING__K", "11")]).unwrap();
        assert!(config.validate().is_err());

        let config = load_from(&[("AUTOSCALER_ACCEPT_TIMEOUT_MS", "0")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_value_is_error() {
        assert!(load_from(&[("AUTOSCALER_LISTEN_PORT", "eighty")]).is_err());
    }
}
