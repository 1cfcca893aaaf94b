//! Shared engine types

use serde::Serialize;

/// Health of one configured endpoint.
///
/// `Unknown` is the state of a freshly configured endpoint: it has not been
/// probed yet, but it is still a failover candidate. Only `Unhealthy`
/// endpoints are skipped during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HealthState::Unknown => 0,
            HealthState::Healthy => 1,
            HealthState::Unhealthy => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful authentication outcome with the resolved identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    /// Distinguished name the user was authenticated as
    pub dn: String,
}

/// Point-in-time health report for one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    /// Host portion of the endpoint URI
    pub host: String,
    /// Full endpoint URI
    pub uri: String,
    pub status: HealthState,
    /// Last transport error, present while unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Round-trip time of the last successful probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_time_ms: Option<f64>,
    pub consecutive_failures: u32,
}
