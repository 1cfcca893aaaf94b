//! DirAuth Core Library
//!
//! Shared types, configuration snapshots, and the error taxonomy for the
//! DirAuth LDAP authentication engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AuthConfig, AuthMode, SearchScope, TlsOptions};
pub use error::{AuthError, Result};

use std::time::Duration;

/// DirAuth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fixed token returned when reading a write-only secret option
pub const REDACTED_SECRET: &str = "*********";

/// `search_dn_attribute` value selecting the matched entry's own DN
pub const ENTRY_DN_ATTRIBUTE: &str = "entryDN";

/// Timeout for establishing a directory connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single health probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for acquiring a pooled connection
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of pooled connections per endpoint
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Default interval between health probe rounds
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
