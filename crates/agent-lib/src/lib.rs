//! Core library for the healwatch monitoring agent
//!
//! This crate provides:
//! - Sample collection (synthetic, Linux counters, remote agent over HTTP)
//! - Streaming anomaly detection with cooldowns and leak trend fitting
//! - A process-wide self-healing controller
//! - Per-connection monitoring sessions with source failover
//! - Health checks and observability

pub mod anomaly;
pub mod collector;
pub mod error;
pub mod healing;
pub mod health;
pub mod models;
pub mod observability;
pub mod session;

pub use error::{CollectionError, ConfigError, ParseError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
