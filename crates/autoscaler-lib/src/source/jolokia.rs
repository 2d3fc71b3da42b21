//! Jolokia HTTP bridge to the broker's management attributes
//!
//! Speaks the Jolokia JSON protocol: every read is a POST of a request
//! object, and the reply carries its own `status` field independent of
//! the HTTP status line.

use super::{async_trait, AttributeQuery};
use crate::error::{ScalerError, ScalerResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound for one round-trip to the bridge
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Jolokia error types meaning "no such group or attribute"
const NOT_FOUND_ERRORS: &[&str] = &["InstanceNotFoundException", "AttributeNotFoundException"];

/// Reply envelope for a single Jolokia request
#[derive(Debug, Deserialize)]
struct JolokiaReply {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl JolokiaReply {
    fn is_not_found(&self) -> bool {
        self.status == 404
            || self
                .error_type
                .as_deref()
                .map(|t| NOT_FOUND_ERRORS.iter().any(|e| t.contains(e)))
                .unwrap_or(false)
    }

    fn describe_error(&self) -> String {
        format!(
            "status {}: {}",
            self.status,
            self.error.as_deref().unwrap_or("no error message")
        )
    }
}

/// Attribute-query backend over a Jolokia endpoint
pub struct JolokiaClient {
    client: Client,
    endpoint: String,
    opened: AtomicBool,
}

impl JolokiaClient {
    /// Create a client for the given endpoint URL (e.g. `http://127.0.0.1:8778/jolokia`)
    pub fn new(endpoint: impl Into<String>) -> ScalerResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ScalerError::BadConfig(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            opened: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// POST one request and decode the reply envelope
    async fn send(&self, body: Value) -> ScalerResult<JolokiaReply> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScalerError::SourceUnavailable(format!("{}: {}", self.endpoint, e)))?;

        if !response.status().is_success() {
            return Err(ScalerError::SourceUnavailable(format!(
                "{} returned HTTP {}",
                self.endpoint,
                response.status()
            )));
        }

        response
            .json::<JolokiaReply>()
            .await
            .map_err(|e| ScalerError::SourceUnavailable(format!("malformed reply: {}", e)))
    }

    /// Send a read request on an opened channel
    async fn read(&self, group: &str, attribute: Option<&str>) -> ScalerResult<Value> {
        if !self.is_opened() {
            return Err(ScalerError::SourceUnavailable("metric channel is not open".to_string()));
        }

        let mut body = json!({ "type": "read", "mbean": group });
        if let Some(attribute) = attribute {
            body["attribute"] = json!(attribute);
        }

        let reply = self.send(body).await?;
        if reply.status == 200 {
            return Ok(reply.value);
        }

        if reply.is_not_found() {
            return Err(ScalerError::unknown_attribute(
                group,
                attribute.unwrap_or(crate::models::ALL_ATTRIBUTES),
            ));
        }

        Err(ScalerError::SourceUnavailable(reply.describe_error()))
    }
}

#[async_trait]
impl AttributeQuery for JolokiaClient {
    async fn open(&self) -> ScalerResult<()> {
        let reply = self.send(json!({ "type": "version" })).await?;
        if reply.status != 200 {
            return Err(ScalerError::SourceUnavailable(reply.describe_error()));
        }

        self.opened.store(true, Ordering::SeqCst);
        let agent = reply
            .value
            .get("agent")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        info!(
            endpoint = %self.endpoint,
            agent = %agent,
            "Opened metric channel"
        );
        Ok(())
    }

    async fn read_attribute(&self, group: &str, attribute: &str) -> ScalerResult<f64> {
        let value = self.read(group, Some(attribute)).await?;
        value
            .as_f64()
            .ok_or_else(|| ScalerError::unknown_attribute(group, attribute))
    }

    async fn read_all(&self, group: &str) -> ScalerResult<BTreeMap<String, f64>> {
        let value = self.read(group, None).await?;
        let object = value.as_object().ok_or_else(|| {
            ScalerError::SourceUnavailable(format!("expected attribute map for {}", group))
        })?;

        let values: BTreeMap<String, f64> = object
            .iter()
            .filter_map(|(name, v)| v.as_f64().map(|n| (name.clone(), n)))
            .collect();

        debug!(
            group = %group,
            numeric = values.len(),
            skipped = object.len() - values.len(),
            "Read all attributes"
        );
        Ok(values)
    }

    async fn close(&self) {
        if self.opened.swap(false, Ordering::SeqCst) {
            info!(endpoint = %self.endpoint, "Closed metric channel");
        }
    }
}
