//! Health reporting utilities.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health of one registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    /// Registry name.
    pub name: String,
    /// Backend kind label.
    pub kind: String,
    /// `true` when the backend answered its health check.
    pub healthy: bool,
    /// Why the backend is unhealthy, when known.
    pub error: Option<String>,
}

impl BackendHealth {
    /// A backend that passed its check.
    #[must_use]
    pub fn healthy(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            healthy: true,
            error: None,
        }
    }

    /// A backend that failed its check.
    #[must_use]
    pub fn unhealthy(
        name: impl Into<String>,
        kind: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            healthy: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregate health of every registered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Per-backend results, in registration order.
    pub backends: Vec<BackendHealth>,
    /// When the checks ran.
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Creates a report stamped with the current time.
    #[must_use]
    pub fn new(backends: Vec<BackendHealth>) -> Self {
        Self {
            backends,
            checked_at: Utc::now(),
        }
    }

    /// `true` when at least one backend is registered and all of them are healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.backends.is_empty() && self.backends.iter().all(|backend| backend.healthy)
    }

    /// Looks up one backend by registry name.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&BackendHealth> {
        self.backends.iter().find(|backend| backend.name == name)
    }

    /// Backends that failed their check.
    pub fn unhealthy(&self) -> impl Iterator<Item = &BackendHealth> {
        self.backends.iter().filter(|backend| !backend.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_failure_makes_the_report_unhealthy() {
        let report = HealthReport::new(vec![
            BackendHealth::healthy("short_term", "short_term"),
            BackendHealth::unhealthy("cache", "cache", "ping failed"),
        ]);
        assert!(!report.is_healthy());
        let failed: Vec<&str> = report.unhealthy().map(|b| b.name.as_str()).collect();
        assert_eq!(failed, ["cache"]);
        assert_eq!(
            report.backend("cache").and_then(|b| b.error.as_deref()),
            Some("ping failed")
        );
    }

    #[test]
    fn empty_report_is_not_healthy() {
        assert!(!HealthReport::new(Vec::new()).is_healthy());
    }
}
