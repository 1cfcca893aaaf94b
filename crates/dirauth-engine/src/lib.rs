//! DirAuth Engine - Failover-aware directory authentication
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DirAuth Engine                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐   │
//! │  │ EngineContext │  │ ServerRegistry│  │ HealthMonitor │   │
//! │  │               │  │               │  │               │   │
//! │  │ - Auth entry  │  │ - Endpoint    │  │ - Background  │   │
//! │  │ - Failover    │  │   ordering    │  │   probes      │   │
//! │  │ - Reload      │  │ - Health state│  │ - Promotion   │   │
//! │  └───────┬───────┘  └───────┬───────┘  └───────┬───────┘   │
//! │          │                  │                  │           │
//! │          └──────────────────┼──────────────────┘           │
//! │                             │                               │
//! │  ┌───────────────┐  ┌───────┴───────┐  ┌───────────────┐   │
//! │  │  Strategies   │  │    PoolSet    │  │ HealthReport  │   │
//! │  │ bind /        │  │  per-endpoint │  │  JSON status  │   │
//! │  │ search+bind   │  │  connections  │  │  snapshots    │   │
//! │  └───────────────┘  └───────┬───────┘  └───────────────┘   │
//! │                             │                               │
//! │                    ┌────────┴────────┐                      │
//! │                    │DirectoryConnector│                     │
//! │                    │  (ldap3 / TLS)  │                      │
//! │                    └─────────────────┘                      │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Ordered Failover**: Servers tried in configured priority order
//! - **Fault Classification**: Transport faults fail over, credential
//!   rejections never do
//! - **Connection Pooling**: Bounded per-endpoint pools with epoch
//!   invalidation across reloads
//! - **Health Monitoring**: Unhealthy endpoints probed in the background
//!   and promoted on recovery
//! - **Two Auth Modes**: Direct bind and search+bind DN resolution
//! - **TLS Support**: ldaps and StartTLS with optional client identity

mod connector;
mod engine;
mod monitor;
mod pool;
mod registry;
mod status;
mod strategy;

pub use connector::{
    BindStatus, DirectoryConnection, DirectoryConnector, LdapConnector, SearchOutcome,
};
pub use engine::EngineContext;
pub use status::HealthReport;
pub use strategy::{strategy_for, AuthStrategy, BindStrategy, SearchBindStrategy};

// Re-export types from core
pub use dirauth_core::types::{AuthSuccess, EndpointStatus, HealthState};
pub use dirauth_core::{AuthConfig, AuthError, AuthMode, Result};
