//! Error types for DirAuth
//!
//! The taxonomy distinguishes three classes that the engine treats
//! differently: configuration errors propagate to the caller unchanged,
//! transport faults trigger failover to the next endpoint, and credential
//! rejections are terminal for the attempt.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    // Configuration errors
    #[error("no directory server configured; set the 'servers' option")]
    NoServerConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a TLS client certificate was set without a key; set 'tls_key_path'")]
    MissingTlsKeyPath,

    #[error("the matched entry has no '{0}' attribute to take the user DN from")]
    MissingDnAttribute(String),

    // Transport faults
    #[error("directory connection failure: {0}")]
    Connection(String),

    #[error("TLS setup failure: {0}")]
    Tls(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("directory operation timed out: {0}")]
    Timeout(String),

    #[error("timed out waiting for a pooled connection")]
    PoolExhausted,

    #[error("search principal bind failed: {0}")]
    ServiceBind(String),

    #[error("all configured directory servers are unavailable")]
    AllServersUnavailable,

    // Credential rejections
    #[error("authentication failed: invalid credentials")]
    InvalidCredentials,

    #[error("authentication failed: no directory entry matches '{0}'")]
    NoMatchingEntry(String),

    #[error("authentication failed: multiple directory entries match '{0}'")]
    AmbiguousMatch(String),
}

impl AuthError {
    /// A fault of the transport itself. The engine marks the endpoint
    /// unhealthy and advances to the next candidate.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            AuthError::Connection(_)
                | AuthError::Tls(_)
                | AuthError::Io(_)
                | AuthError::Timeout(_)
                | AuthError::PoolExhausted
                | AuthError::ServiceBind(_)
        )
    }

    /// A definitive rejection of the presented credentials. Terminal for the
    /// attempt; the engine does not fail over for this cause.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::NoMatchingEntry(_)
                | AuthError::AmbiguousMatch(_)
        )
    }

    /// A configuration or availability error: the engine could not produce a
    /// definitive outcome.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AuthError::NoServerConfigured
                | AuthError::InvalidConfig(_)
                | AuthError::MissingTlsKeyPath
                | AuthError::MissingDnAttribute(_)
        )
    }
}
