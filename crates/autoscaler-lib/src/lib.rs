//! Autoscaling controller for broker load experiments
//!
//! This crate provides the core functionality for:
//! - Sampling broker throughput metrics
//! - Deciding producer scale-outs and experiment termination
//! - Commanding producer hosts over persistent connections
//! - The operator control port
//! - Health checks and observability

pub mod control;
pub mod controller;
pub mod decision;
pub mod error;
pub mod fanout;
pub mod health;
pub mod models;
pub mod observability;
pub mod source;

pub use controller::{Controller, ControllerBuilder, RunMode, RunSummary, StopReason};
pub use error::{ScalerError, ScalerResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse, RunPhase,
};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
