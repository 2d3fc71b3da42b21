//! Controller health as served by the HTTP endpoint
//!
//! The controller task is the only writer. Each component is updated from
//! what the controller observes on it, and readiness follows the run phase.

use crate::error::ScalerError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still usable; the run goes on
    Degraded,
    /// The run cannot go on
    Unhealthy,
}

/// Where the controller is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// Opening the metric channel and producer connections
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the status last changed
    pub since_ms: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Worst status over all components
    pub status: ComponentStatus,
    pub phase: RunPhase,
    pub components: BTreeMap<&'static str, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names as they appear in the health response
pub mod components {
    pub const METRIC_SOURCE: &str = "metric_source";
    pub const PRODUCERS: &str = "producers";
    pub const CONTROL_PORT: &str = "control_port";

    pub const ALL: &[&str] = &[METRIC_SOURCE, PRODUCERS, CONTROL_PORT];
}

#[derive(Debug)]
struct HealthState {
    phase: RunPhase,
    components: BTreeMap<&'static str, ComponentHealth>,
}

impl HealthState {
    /// Replace a component's health; `since_ms` moves only when the status changes.
    fn set(&mut self, name: &'static str, status: ComponentStatus, message: Option<String>) {
        match self.components.get_mut(name) {
            Some(current) if current.status == status => current.message = message,
            _ => {
                self.components.insert(name, ComponentHealth::new(status, message));
            }
        }
    }

    fn status_of(&self, name: &str) -> ComponentStatus {
        self.components
            .get(name)
            .map(|c| c.status)
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Shared view of controller health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy in the `Starting` phase
    pub fn new() -> Self {
        let components = components::ALL
            .iter()
            .map(|name| (*name, ComponentHealth::new(ComponentStatus::Healthy, None)))
            .collect();

        Self {
            state: Arc::new(RwLock::new(HealthState {
                phase: RunPhase::Starting,
                components,
            })),
        }
    }

    pub async fn set_phase(&self, phase: RunPhase) {
        self.state.write().await.phase = phase;
    }

    /// A tick sampled the broker successfully
    pub async fn source_sampled(&self) {
        self.restore(components::METRIC_SOURCE).await;
    }

    /// Record a metric channel failure; channel-fatal errors make the source unhealthy
    pub async fn source_failed(&self, error: &ScalerError) {
        let status = if error.is_fatal_for_source() {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        self.state
            .write()
            .await
            .set(components::METRIC_SOURCE, status, Some(error.to_string()));
    }

    /// Producers are degraded while any endpoint lacks a connection
    pub async fn producers_connected(&self, connected: usize, total: usize) {
        let mut state = self.state.write().await;
        if connected >= total {
            state.set(components::PRODUCERS, ComponentStatus::Healthy, None);
        } else {
            state.set(
                components::PRODUCERS,
                ComponentStatus::Degraded,
                Some(format!("{} of {} producers connected", connected, total)),
            );
        }
    }

    /// A control-port poll completed without an I/O error
    pub async fn control_polled(&self) {
        self.restore(components::CONTROL_PORT).await;
    }

    pub async fn control_failed(&self, error: &ScalerError) {
        self.state.write().await.set(
            components::CONTROL_PORT,
            ComponentStatus::Degraded,
            Some(error.to_string()),
        );
    }

    /// Back to healthy; takes the write lock only on an actual change
    async fn restore(&self, name: &'static str) {
        if self.state.read().await.status_of(name) == ComponentStatus::Healthy {
            return;
        }
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Healthy, None);
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            phase: state.phase,
            components: state.components.clone(),
        }
    }

    /// Ready while the loop runs on a usable metric source
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = match state.phase {
            RunPhase::Starting => Some("Controller not yet initialized".to_string()),
            RunPhase::Stopped => Some("Controller has stopped".to_string()),
            RunPhase::Running if state.status_of(components::METRIC_SOURCE) == ComponentStatus::Unhealthy => {
                Some("Metric source unavailable".to_string())
            }
            RunPhase::Running => None,
        };

        ReadinessResponse {
            ready: reason.is_none(),
            phase: state.phase,
            reason,
        }
    }
}
