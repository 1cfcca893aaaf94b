//! Server registry
//!
//! Ordered list of configured directory endpoints with independently tracked
//! health. The listed order is the failover priority and is stable within a
//! config generation. Health is a tagged state held in an atomic, so
//! endpoint selection never blocks behind monitor writes and no reader
//! observes a partially updated record.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info};
use url::Url;

use dirauth_core::types::{EndpointStatus, HealthState};

/// One configured directory endpoint
pub struct ServerEndpoint {
    url: Url,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    last_error: RwLock<Option<String>>,
    last_probe: RwLock<Option<Instant>>,
    ping_time: RwLock<Option<Duration>>,
}

impl ServerEndpoint {
    fn new(url: Url) -> Self {
        Self {
            url,
            state: AtomicU8::new(HealthState::Unknown.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            last_error: RwLock::new(None),
            last_probe: RwLock::new(None),
            ping_time: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host portion of the URI, falling back to the full URI
    pub fn host_string(&self) -> String {
        match self.url.host() {
            Some(host) => host.to_string(),
            None => self.url.to_string(),
        }
    }

    pub fn health(&self) -> HealthState {
        HealthState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health() == HealthState::Unhealthy
    }

    /// Promote to healthy. Called on any real connection or bind success and
    /// on a successful probe.
    pub fn mark_healthy(&self, ping_time: Option<Duration>) {
        let prev = self
            .state
            .swap(HealthState::Healthy.as_u8(), Ordering::AcqRel);
        let prev = HealthState::from_u8(prev);

        self.consecutive_failures.store(0, Ordering::Release);
        if let Some(ping) = ping_time {
            *self.ping_time.write() = Some(ping);
        }
        if prev != HealthState::Healthy {
            *self.last_error.write() = None;
            info!("endpoint {} transition {} -> healthy", self.url, prev);
        }
    }

    /// Demote to unhealthy with the transport error that caused it
    pub fn mark_unhealthy(&self, reason: &str) {
        let prev = self
            .state
            .swap(HealthState::Unhealthy.as_u8(), Ordering::AcqRel);
        let prev = HealthState::from_u8(prev);

        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        *self.last_error.write() = Some(reason.to_string());
        *self.ping_time.write() = None;
        if prev != HealthState::Unhealthy {
            info!("endpoint {} transition {} -> unhealthy: {}", self.url, prev, reason);
        }
    }

    /// Record an unsuccessful probe without a state transition
    pub fn record_probe_failure(&self, reason: &str) {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        *self.last_error.write() = Some(reason.to_string());
        debug!("probe of {} failed: {}", self.url, reason);
    }

    pub fn record_probe(&self) {
        *self.last_probe.write() = Some(Instant::now());
    }

    pub fn status(&self) -> EndpointStatus {
        EndpointStatus {
            host: self.host_string(),
            uri: self.url.to_string(),
            status: self.health(),
            error: self.last_error.read().clone(),
            ping_time_ms: self
                .ping_time
                .read()
                .map(|d| d.as_micros() as f64 / 1000.0),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
        }
    }
}

/// Ordered endpoint list with health state, shared between the engine and
/// the health monitor
#[derive(Default)]
pub struct ServerRegistry {
    endpoints: RwLock<Vec<Arc<ServerEndpoint>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the endpoint list for a new config generation. Endpoints
    /// whose URL survives keep their health state; new ones start unknown.
    /// Returns the URLs that were removed so their pools can be closed.
    pub fn sync(&self, servers: &[Url]) -> Vec<Url> {
        let mut endpoints = self.endpoints.write();
        let old = std::mem::take(&mut *endpoints);

        for url in servers {
            match old.iter().find(|e| e.url() == url) {
                Some(existing) => endpoints.push(Arc::clone(existing)),
                None => {
                    debug!("registering endpoint {}", url);
                    endpoints.push(Arc::new(ServerEndpoint::new(url.clone())));
                }
            }
        }

        old.iter()
            .filter(|e| !servers.contains(e.url()))
            .map(|e| e.url().clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Endpoints eligible for an authentication attempt, in priority order.
    /// Unknown endpoints are candidates; only unhealthy ones are skipped.
    pub fn candidates(&self) -> Vec<Arc<ServerEndpoint>> {
        self.endpoints
            .read()
            .iter()
            .filter(|e| !e.is_unhealthy())
            .cloned()
            .collect()
    }

    /// Probe targets for the health monitor
    pub fn unhealthy(&self) -> Vec<Arc<ServerEndpoint>> {
        self.endpoints
            .read()
            .iter()
            .filter(|e| e.is_unhealthy())
            .cloned()
            .collect()
    }

    /// Side-effect-free health snapshot, in configured order
    pub fn statuses(&self) -> Vec<EndpointStatus> {
        self.endpoints.read().iter().map(|e| e.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn test_new_endpoints_start_unknown_and_are_candidates() {
        let registry = ServerRegistry::new();
        registry.sync(&urls(&["ldap://one.example.io", "ldap://two.example.io"]));

        let candidates = registry.candidates();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|e| e.health() == HealthState::Unknown));
    }

    #[test]
    fn test_candidates_preserve_configured_order() {
        let registry = ServerRegistry::new();
        registry.sync(&urls(&[
            "ldap://one.example.io",
            "ldap://two.example.io",
            "ldap://three.example.io",
        ]));

        registry.candidates()[1].mark_unhealthy("connection refused");

        let candidates = registry.candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].host_string(), "one.example.io");
        assert_eq!(candidates[1].host_string(), "three.example.io");
    }

    #[test]
    fn test_sync_keeps_health_of_surviving_endpoints() {
        let registry = ServerRegistry::new();
        registry.sync(&urls(&["ldap://one.example.io", "ldap://two.example.io"]));
        registry.candidates()[0].mark_unhealthy("down");

        let removed = registry.sync(&urls(&["ldap://one.example.io", "ldap://three.example.io"]));

        assert_eq!(removed, urls(&["ldap://two.example.io"]));
        let statuses = registry.statuses();
        assert_eq!(statuses[0].status, HealthState::Unhealthy);
        assert_eq!(statuses[1].status, HealthState::Unknown);
    }

    #[test]
    fn test_health_transitions_reset_failure_count() {
        let registry = ServerRegistry::new();
        registry.sync(&urls(&["ldap://one.example.io"]));
        let endpoint = &registry.candidates()[0];

        endpoint.mark_unhealthy("refused");
        endpoint.record_probe_failure("still refused");
        assert_eq!(endpoint.status().consecutive_failures, 2);
        assert!(endpoint.status().error.is_some());

        endpoint.mark_healthy(Some(Duration::from_millis(2)));
        let status = endpoint.status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.error.is_none());
        assert_eq!(status.ping_time_ms, Some(2.0));
    }

    #[test]
    fn test_empty_registry_is_distinguishable() {
        let registry = ServerRegistry::new();
        assert!(registry.is_empty());
        registry.sync(&urls(&["ldap://one.example.io"]));
        assert!(!registry.is_empty());
        registry.candidates()[0].mark_unhealthy("down");
        assert!(!registry.is_empty());
        assert!(registry.candidates().is_empty());
    }
}
