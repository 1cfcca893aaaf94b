//! DirAuth Module - Host-facing surface of the directory authentication engine
//!
//! Wires a [`ConfigStore`] (the string-keyed option surface the host's
//! CONFIG commands talk to) to a running [`EngineContext`] and exposes the
//! three calls the host needs: apply a config change, authenticate a user,
//! and render a health report.
//!
//! The authenticate call returns an [`AuthDecision`], not a bare result:
//! `Allow` and `Deny` are final verdicts, while `Fallthrough` defers to the
//! host's own credential check. The engine being disabled and the directory
//! rejecting the credentials both fall through; only availability and
//! configuration failures deny.
//!
//! [`EngineContext`]: dirauth_engine::EngineContext

mod module;
mod store;

pub use module::{AuthDecision, DirAuthModule};
pub use store::{ConfigStore, CONFIG_KEYS};

// Re-export the engine surface the host embeds
pub use dirauth_engine::{DirectoryConnector, EngineContext, HealthReport, LdapConnector};

// Re-export types from core
pub use dirauth_core::{AuthConfig, AuthError, AuthMode, Result, REDACTED_SECRET};
