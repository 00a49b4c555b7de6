use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

/// Health reporting for the long-running parts of a service.
///
/// Each component registers with a deadline and must keep reporting healthy more often than
/// that. The registry is healthy when every component has a report that hasn't expired. A
/// component that never reported, stopped reporting, or reported unhealthy fails the check.
///
/// Use one registry per probe. The consumer only exposes liveness: a stuck ingestion loop is
/// something a restart fixes, a slow database isn't.
#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Computes the axum status code based on the overall health status,
    /// and prints each component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, no report yet
    Starting,
    /// Recently reported healthy, will need to report again before the deadline
    HealthyUntil(Instant),
    /// Reported unhealthy
    Unhealthy,
    /// Missed its deadline
    Stalled,
}

impl ComponentStatus {
    fn resolve(self, now: Instant) -> Self {
        match self {
            ComponentStatus::HealthyUntil(until) if until <= now => ComponentStatus::Stalled,
            status => status,
        }
    }
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Report healthy. Must be called more frequently than the configured deadline.
    /// Never blocks on anything but a short map write, so it is safe from rdkafka callbacks.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            // Poisoned lock: the probe will fail and the process restart.
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component in the registry. The returned handle should be passed
    /// to the component, to allow it to frequently report its health status.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Returns the overall process status, computed from the status of all the components
    /// currently registered. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let now = Instant::now();
        let components: HashMap<String, ComponentStatus> = match self.components.read() {
            Ok(map) => map
                .iter()
                .map(|(name, status)| (name.clone(), status.resolve(now)))
                .collect(),
            Err(_) => {
                warn!("poisoned HealthRegistry lock");
                return HealthStatus::default();
            }
        };

        let healthy = !components.is_empty()
            && components
                .values()
                .all(|status| matches!(status, ComponentStatus::HealthyUntil(_)));

        let result = HealthStatus {
            healthy,
            components,
        };
        if !healthy {
            info!("{} health check failed: {:?}", self.name, result.components);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");

        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_registered_component_starts_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        registry.register("ingestion", Duration::from_secs(30));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("ingestion"),
            Some(&ComponentStatus::Starting)
        );
    }

    #[test]
    fn test_all_components_must_report() {
        let registry = HealthRegistry::new("liveness");
        let ingestion = registry.register("ingestion", Duration::from_secs(30));
        let kafka = registry.register("kafka", Duration::from_secs(30));

        ingestion.report_healthy();
        assert!(!registry.get_status().healthy);

        kafka.report_healthy();
        assert!(registry.get_status().healthy);

        kafka.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_missed_deadline_stalls() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("ingestion", Duration::ZERO);

        handle.report_healthy();

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("ingestion"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn test_status_code() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("ingestion", Duration::from_secs(30));
        assert_eq!(
            registry.get_status().into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        handle.report_healthy();
        assert_eq!(
            registry.get_status().into_response().status(),
            StatusCode::OK
        );
    }
}
