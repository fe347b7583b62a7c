//! Observability utilities for the memory subsystem.

#![warn(missing_docs, clippy::pedantic)]

pub mod health;
pub mod stats;
pub mod tracing_support;

pub use health::{BackendHealth, HealthReport};
pub use stats::{BackendStats, StatsReport};
pub use tracing_support::init_tracing;
