//! Module surface
//!
//! What the host key-value store sees: a config store wired to a running
//! engine, an authenticate call that yields a three-way decision for the
//! ACL layer, and a status snapshot. The decision contract: `Allow` and
//! `Deny` are final, `Fallthrough` hands the verdict to the host's local
//! credential check.

use std::sync::Arc;

use tracing::{debug, info, warn};

use dirauth_core::{AuthError, Result};
use dirauth_engine::{DirectoryConnector, EngineContext, HealthReport, LdapConnector};

use crate::store::ConfigStore;

/// Outcome handed to the host's ACL layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The directory confirmed the credentials
    Allow {
        /// Distinguished name the user authenticated as
        dn: String,
    },
    /// Authentication fails outright; the engine was configured to answer
    /// but could not reach a usable server
    Deny(AuthError),
    /// The host's local credential check decides
    Fallthrough,
}

/// Directory authentication module: config surface plus running engine
pub struct DirAuthModule {
    store: ConfigStore,
    engine: Arc<EngineContext>,
}

impl Default for DirAuthModule {
    fn default() -> Self {
        Self::new()
    }
}

impl DirAuthModule {
    /// Module over the production LDAP transport. Spawns the engine's
    /// health monitor, so this must run inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(LdapConnector::new()))
    }

    /// Module over an injected transport
    pub fn with_connector(connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            store: ConfigStore::new(),
            engine: Arc::new(EngineContext::new(connector)),
        }
    }

    /// Apply one config option and install the resulting snapshot. On error
    /// the previous option value and engine snapshot both stay live.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let config = self.store.set(key, value)?;
        self.engine.install_config(config).await?;
        debug!("installed config change {}", key);
        Ok(())
    }

    /// Read one config option (secrets redacted)
    pub fn get_config(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    /// Every config option with its (redacted) value
    pub fn config_entries(&self) -> Vec<(String, String)> {
        self.store.entries()
    }

    /// Authenticate a user for the host's AUTH path.
    ///
    /// Disabled engine: fall through without touching the network. A
    /// credential rejection also falls through, so a directory "no" still
    /// lets a matching local credential win. Availability and configuration
    /// failures deny, because the directory was supposed to answer.
    pub async fn authenticate(&self, username: &str, password: &str) -> AuthDecision {
        let config = self.engine.config();
        if !config.enabled {
            return AuthDecision::Fallthrough;
        }

        match self.engine.authenticate(username, password).await {
            Ok(success) => {
                debug!("directory authenticated '{}' as '{}'", username, success.dn);
                AuthDecision::Allow { dn: success.dn }
            }
            Err(err) if err.is_credential_rejection() => {
                info!("directory rejected credentials for '{}': {}", username, err);
                AuthDecision::Fallthrough
            }
            Err(err) => {
                warn!(
                    "directory authentication unavailable for '{}': {}",
                    username, err
                );
                AuthDecision::Deny(err)
            }
        }
    }

    /// Health snapshot for the status command; never touches the network
    pub fn status(&self) -> HealthReport {
        HealthReport::new(self.engine.statuses())
    }

    /// Stop the monitor and close every pooled connection. The module is
    /// inert afterwards; a reload builds a fresh one.
    pub async fn shutdown(&self) {
        info!("shutting down directory authentication module");
        self.engine.shutdown().await;
    }
}
