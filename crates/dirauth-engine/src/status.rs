//! Health report assembly
//!
//! Snapshot of every configured endpoint, timestamped and serializable for
//! the host's status command. Producing a report never touches the network.

use chrono::{DateTime, Utc};
use serde::Serialize;

use dirauth_core::types::EndpointStatus;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub servers: Vec<EndpointStatus>,
}

impl HealthReport {
    pub fn new(servers: Vec<EndpointStatus>) -> Self {
        Self {
            generated_at: Utc::now(),
            servers,
        }
    }

    /// JSON rendering of the report. The report is plain data; serialization
    /// cannot fail, so a failure degrades to an empty object rather than an
    /// error the caller cannot act on.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
