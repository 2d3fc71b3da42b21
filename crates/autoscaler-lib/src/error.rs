//! Error types for the autoscaler

use thiserror::Error;

/// Result type alias for autoscaler operations.
pub type ScalerResult<T> = Result<T, ScalerError>;

/// Errors surfaced by the autoscaler components.
#[derive(Debug, Error)]
pub enum ScalerError {
    /// The metric channel is not open or broke mid-tick.
    #[error("metric source unavailable: {0}")]
    SourceUnavailable(String),

    /// A metric group or attribute is not exposed by the broker.
    #[error("unknown attribute {group}#{attribute}")]
    UnknownAttribute { group: String, attribute: String },

    /// A producer endpoint could not be reached or written to.
    #[error("producer endpoint {endpoint} unreachable: {source}")]
    EndpointUnreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to a control-port client failed.
    #[error("control port I/O error: {0}")]
    ControlIo(#[from] std::io::Error),

    /// Malformed command line, bean file or configuration value.
    #[error("bad configuration: {0}")]
    BadConfig(String),
}

impl ScalerError {
    pub fn unknown_attribute(group: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            group: group.into(),
            attribute: attribute.into(),
        }
    }

    /// True when the error leaves the metric channel unusable.
    pub fn is_fatal_for_source(&self) -> bool {
        matches!(self, ScalerError::SourceUnavailable(_))
    }
}
