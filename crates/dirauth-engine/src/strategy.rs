//! Authentication strategies
//!
//! Bind mode and search+bind mode are two implementations of one contract,
//! selected by configuration. Each strategy owns its own classification of
//! transport-fault versus credential-rejection, so the engine's failover
//! decision stays uniform.

use async_trait::async_trait;
use tracing::debug;

use dirauth_core::types::AuthSuccess;
use dirauth_core::{AuthConfig, AuthError, AuthMode, Result};

use crate::connector::{BindStatus, DirectoryConnection, SearchOutcome};

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    async fn authenticate(
        &self,
        conn: &mut dyn DirectoryConnection,
        config: &AuthConfig,
        username: &str,
        password: &str,
    ) -> Result<AuthSuccess>;
}

/// Select the configured strategy
pub fn strategy_for(mode: AuthMode) -> &'static dyn AuthStrategy {
    match mode {
        AuthMode::Bind => &BindStrategy,
        AuthMode::SearchAndBind => &SearchBindStrategy,
    }
}

/// Direct bind: the target DN is built from the username and the configured
/// prefix/suffix literals.
pub struct BindStrategy;

#[async_trait]
impl AuthStrategy for BindStrategy {
    async fn authenticate(
        &self,
        conn: &mut dyn DirectoryConnection,
        config: &AuthConfig,
        username: &str,
        password: &str,
    ) -> Result<AuthSuccess> {
        let dn = config.bind_dn(username);
        debug!("bind-mode authentication as '{}'", dn);

        match conn.simple_bind(&dn, password).await? {
            BindStatus::Success => Ok(AuthSuccess { dn }),
            BindStatus::InvalidCredentials => Err(AuthError::InvalidCredentials),
        }
    }
}

/// Search then bind: resolve the user's DN with the configured search
/// principal, then bind as that identity with the user's password.
pub struct SearchBindStrategy;

#[async_trait]
impl AuthStrategy for SearchBindStrategy {
    async fn authenticate(
        &self,
        conn: &mut dyn DirectoryConnection,
        config: &AuthConfig,
        username: &str,
        password: &str,
    ) -> Result<AuthSuccess> {
        // Phase 1: administrative bind and DN resolution. A rejected search
        // principal means this endpoint is unusable, which is a transport
        // fault for failover purposes.
        if let (Some(bind_dn), Some(bind_passwd)) =
            (&config.search_bind_dn, &config.search_bind_passwd)
        {
            debug!("administrative bind as '{}'", bind_dn);
            match conn.simple_bind(bind_dn, bind_passwd).await? {
                BindStatus::Success => {}
                BindStatus::InvalidCredentials => {
                    return Err(AuthError::ServiceBind(format!(
                        "search principal '{bind_dn}' was rejected"
                    )));
                }
            }
        }

        let base = config.search_base.as_deref().unwrap_or("");
        let filter = config.user_search_filter(username);

        let dn = match conn
            .search_dn(
                base,
                config.search_scope,
                &filter,
                &config.search_dn_attribute,
            )
            .await?
        {
            SearchOutcome::One(dn) => dn,
            SearchOutcome::None => {
                return Err(AuthError::NoMatchingEntry(username.to_string()));
            }
            SearchOutcome::Many => {
                return Err(AuthError::AmbiguousMatch(username.to_string()));
            }
        };

        // Phase 2: bind as the resolved identity; classification matches
        // bind mode.
        debug!("resolved '{}' to DN '{}'", username, dn);
        match conn.simple_bind(&dn, password).await? {
            BindStatus::Success => Ok(AuthSuccess { dn }),
            BindStatus::InvalidCredentials => Err(AuthError::InvalidCredentials),
        }
    }
}
