//! Broker metric sampling
//!
//! This module provides the adapter that turns a list of metric specs into
//! one flat `group#attr -> value` mapping per tick, on top of a pluggable
//! attribute-query backend. It also locates the broker process to sample.

mod discovery;
mod jolokia;

pub use discovery::{BrokerProcess, ProcessLocator};
pub use jolokia::JolokiaClient;

use crate::error::{ScalerError, ScalerResult};
use crate::models::{MetricSpec, Readings};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub use async_trait::async_trait;

/// Trait for broker attribute-query backends
#[async_trait]
pub trait AttributeQuery: Send + Sync {
    /// Open the metric channel
    async fn open(&self) -> ScalerResult<()>;

    /// Read one named attribute of a metric group
    async fn read_attribute(&self, group: &str, attribute: &str) -> ScalerResult<f64>;

    /// Read every readable numeric attribute of a metric group
    async fn read_all(&self, group: &str) -> ScalerResult<BTreeMap<String, f64>>;

    /// Close the metric channel
    async fn close(&self);
}

/// Samples metric specs through an attribute-query backend
#[derive(Clone)]
pub struct MetricSource {
    backend: Arc<dyn AttributeQuery>,
}

impl MetricSource {
    pub fn new(backend: Arc<dyn AttributeQuery>) -> Self {
        Self { backend }
    }

    pub async fn open(&self) -> ScalerResult<()> {
        self.backend.open().await
    }

    pub async fn close(&self) {
        self.backend.close().await
    }

    /// Sample all specs into one flat mapping.
    ///
    /// Unknown attributes are logged and left out of the result;
    /// any other failure aborts the tick.
    pub async fn query(&self, specs: &[MetricSpec]) -> ScalerResult<Readings> {
        let mut readings = Readings::new();

        for spec in specs {
            let values = match self.query_spec(spec).await {
                Ok(values) => values,
                Err(ScalerError::UnknownAttribute { group, attribute }) => {
                    warn!(group = %group, attribute = %attribute, "Metric group not exposed by broker");
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (attribute, value) in values {
                readings.insert(format!("{}#{}", spec.group, attribute), value);
            }
        }

        debug!(values = readings.len(), "Sampled broker metrics");
        Ok(readings)
    }

    /// Values of one spec keyed by attribute name
    async fn query_spec(&self, spec: &MetricSpec) -> ScalerResult<BTreeMap<String, f64>> {
        if spec.is_wildcard() {
            return self.backend.read_all(&spec.group).await;
        }

        let mut values = BTreeMap::new();
        for attribute in &spec.attributes {
            match self.backend.read_attribute(&spec.group, attribute).await {
                Ok(value) => {
                    values.insert(attribute.clone(), value);
                }
                Err(ScalerError::UnknownAttribute { group, attribute }) => {
                    warn!(group = %group, attribute = %attribute, "Unknown attribute, skipping this tick");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(values)
    }
}
