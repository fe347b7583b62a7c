//! Tiered memory subsystem facade.
//!
//! Depend on this crate via `cargo add memory-hub`. It bundles the member
//! crates behind feature flags so downstream users can leave out the
//! backends or embedding adapters they do not need.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared types and the store contract.
pub use memory_primitives as primitives;

/// Backend and manager configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use memory_config as config;

/// Short-term, cache and vector backends (enabled by `backends` feature).
#[cfg(feature = "backends")]
pub use memory_backends as backends;

/// HTTP embedding providers (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use memory_adapters as adapters;

/// Tracing bootstrap and health/stat reports (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use memory_telemetry as telemetry;

/// Store factory and routing manager (enabled by `manager` feature).
#[cfg(feature = "manager")]
pub use memory_manager as manager;
