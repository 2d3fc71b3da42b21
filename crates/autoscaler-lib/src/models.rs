//! Core data models for the autoscaler

use crate::error::{ScalerError, ScalerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Key fragment identifying the broker's incoming message rate.
pub const MESSAGES_IN_KEY: &str = "MessagesInPerSec";
/// Key fragment identifying the broker's incoming byte rate.
pub const BYTES_IN_KEY: &str = "BytesInPerSec";
/// Key fragment identifying the broker's outgoing byte rate.
pub const BYTES_OUT_KEY: &str = "BytesOutPerSec";

/// Metric groups sampled in scaling mode.
const BROKER_METRICS: &[&str] = &[
    "kafka.server:type=BrokerTopicMetrics,name=MessagesInPerSec#OneMinuteRate",
    "kafka.server:name=BytesInPerSec,type=BrokerTopicMetrics#OneMinuteRate",
    "kafka.server:name=BytesOutPerSec,type=BrokerTopicMetrics#OneMinuteRate",
];

/// Wildcard attribute selecting every readable attribute of a group.
pub const ALL_ATTRIBUTES: &str = "*";

/// One tick's throughput observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock milliseconds at sampling time
    pub ts: i64,
    pub messages_in_per_sec: f64,
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
}

impl Sample {
    pub fn new(ts: i64, messages_in_per_sec: f64, bytes_in_per_sec: f64, bytes_out_per_sec: f64) -> Self {
        Self {
            ts,
            messages_in_per_sec,
            bytes_in_per_sec,
            bytes_out_per_sec,
        }
    }

    /// Build a sample from flattened readings, locating metrics by key substring.
    ///
    /// Absent metrics read as zero.
    pub fn from_readings(ts: i64, readings: &Readings) -> Self {
        Self {
            ts,
            messages_in_per_sec: readings.find(MESSAGES_IN_KEY).unwrap_or(0.0),
            bytes_in_per_sec: readings.find(BYTES_IN_KEY).unwrap_or(0.0),
            bytes_out_per_sec: readings.find(BYTES_OUT_KEY).unwrap_or(0.0),
        }
    }

    /// Values in status-line order.
    pub fn values(&self) -> [f64; 3] {
        [
            self.messages_in_per_sec,
            self.bytes_in_per_sec,
            self.bytes_out_per_sec,
        ]
    }
}

/// A metric group and the attributes to read from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub group: String,
    pub attributes: Vec<String>,
}

impl MetricSpec {
    pub fn new(group: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            group: group.into(),
            attributes,
        }
    }

    /// Parse a `group#attr1,attr2,...` line.
    pub fn parse(line: &str) -> ScalerResult<Self> {
        let line = line.trim();
        let (group, csv) = line
            .split_once('#')
            .ok_or_else(|| ScalerError::BadConfig(format!("missing '#' in metric spec: {}", line)))?;

        let group = group.trim();
        if group.is_empty() {
            return Err(ScalerError::BadConfig(format!("empty group in metric spec: {}", line)));
        }

        let attributes: Vec<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if attributes.is_empty() {
            return Err(ScalerError::BadConfig(format!("no attributes in metric spec: {}", line)));
        }

        Ok(Self::new(group, attributes))
    }

    /// Parse every non-empty line of a bean list.
    pub fn parse_list(content: &str) -> ScalerResult<Vec<Self>> {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Load a bean list file.
    pub fn load_file(path: &Path) -> ScalerResult<Vec<Self>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScalerError::BadConfig(format!("cannot read bean file {}: {}", path.display(), e))
        })?;
        let specs = Self::parse_list(&content)?;
        if specs.is_empty() {
            return Err(ScalerError::BadConfig(format!(
                "bean file {} lists no metrics",
                path.display()
            )));
        }
        Ok(specs)
    }

    /// The fixed three-metric set used in scaling mode.
    pub fn broker_defaults() -> Vec<Self> {
        BROKER_METRICS
            .iter()
            .filter_map(|line| Self::parse(line).ok())
            .collect()
    }

    /// Whether this spec asks for all attributes of the group.
    pub fn is_wildcard(&self) -> bool {
        self.attributes.iter().any(|a| a == ALL_ATTRIBUTES)
    }
}

impl fmt::Display for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.attributes.join(","))
    }
}

/// Flattened `group#attr -> value` readings for one tick, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    entries: Vec<(String, f64)>,
}

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.entries.push((key.into(), value));
    }

    /// First value whose key contains `fragment`.
    pub fn find(&self, fragment: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(key, _)| key.contains(fragment))
            .map(|(_, v)| *v)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Error returned when a status line cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("malformed status line: {0}")]
pub struct StatusLineParseError(String);

/// One CSV status line: `<ms-timestamp>, <v1>, <v2>, ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub timestamp_ms: i64,
    pub values: Vec<f64>,
}

impl StatusLine {
    pub fn new(timestamp_ms: i64, values: Vec<f64>) -> Self {
        Self {
            timestamp_ms,
            values,
        }
    }

    /// Last value on the line (the output rate in scaling mode).
    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp_ms)?;
        for value in &self.values {
            write!(f, ", {:.3}", value)?;
        }
        Ok(())
    }
}

impl FromStr for StatusLine {
    type Err = StatusLineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().split(',').map(str::trim);

        let timestamp_ms = fields
            .next()
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| StatusLineParseError(s.to_string()))?;

        let values = fields
            .map(|f| f.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| StatusLineParseError(s.to_string()))?;

        Ok(Self {
            timestamp_ms,
            values,
        })
    }
}
