//! Directory transport seam
//!
//! `DirectoryConnector` and `DirectoryConnection` isolate the engine from the
//! wire protocol: the production implementation drives `ldap3`, while tests
//! inject a fake transport to exercise failover and health transitions
//! deterministically.
//!
//! Classification rule: errors raised by the connection itself (connect,
//! TLS, stream) surface as transport faults; directory result codes surface
//! as domain outcomes (`BindStatus`, `SearchOutcome`) and never trigger
//! failover on their own.

use std::fs;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use ldap3::exop::WhoAmI;
use native_tls::{Certificate, Identity, TlsConnector};
use tracing::debug;
use url::Url;

use dirauth_core::config::{SearchScope, TlsOptions};
use dirauth_core::{AuthConfig, AuthError, Result, CONNECT_TIMEOUT, ENTRY_DN_ATTRIBUTE};

/// LDAP result code for invalid credentials
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Outcome of a simple bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    Success,
    /// The server answered with a credential rejection; the connection
    /// itself is intact and reusable
    InvalidCredentials,
}

/// Outcome of a DN resolution search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Exactly one entry matched; its distinguished name
    One(String),
    None,
    Many,
}

/// One live connection to a directory server
#[async_trait]
pub trait DirectoryConnection: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<BindStatus>;

    /// Search for exactly one matching entry and resolve its bind DN from
    /// `dn_attribute` (the entry's own DN for [`ENTRY_DN_ATTRIBUTE`])
    async fn search_dn(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        dn_attribute: &str,
    ) -> Result<SearchOutcome>;

    /// Lightweight liveness check (WhoAmI)
    async fn whoami(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Opens transport-secured connections to directory endpoints
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(
        &self,
        server: &Url,
        config: &AuthConfig,
    ) -> Result<Box<dyn DirectoryConnection>>;
}

/// Production connector over `ldap3`
#[derive(Debug, Default)]
pub struct LdapConnector;

impl LdapConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(
        &self,
        server: &Url,
        config: &AuthConfig,
    ) -> Result<Box<dyn DirectoryConnection>> {
        debug!("opening directory connection to {}", server);

        let mut settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);

        if config.requires_tls(server) {
            let connector = build_tls_connector(&config.tls)?;
            settings = settings
                .set_connector(connector)
                .set_starttls(config.tls.use_starttls);
        }

        match LdapConnAsync::from_url_with_settings(settings, server).await {
            Ok((conn, ldap)) => {
                ldap3::drive!(conn);
                Ok(Box::new(LdapConnection { ldap }))
            }
            Err(err) => Err(AuthError::Connection(ldap_error_message(&err))),
        }
    }
}

struct LdapConnection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<BindStatus> {
        debug!("running simple bind with DN '{}'", dn);

        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|err| AuthError::Connection(ldap_error_message(&err)))?;

        if result.rc == 0 {
            Ok(BindStatus::Success)
        } else {
            // rc 49 is the canonical rejection; other non-zero codes
            // (account disabled, unwilling to perform) also deny access.
            if result.rc != RC_INVALID_CREDENTIALS {
                debug!("bind for '{}' denied with result code {}", dn, result.rc);
            }
            Ok(BindStatus::InvalidCredentials)
        }
    }

    async fn search_dn(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        dn_attribute: &str,
    ) -> Result<SearchOutcome> {
        debug!(
            "running directory search with filter '{}' under '{}' (dn attribute '{}')",
            filter, base, dn_attribute
        );

        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        };

        // "1.1" requests no attributes; the entry DN comes for free.
        let attrs = if dn_attribute == ENTRY_DN_ATTRIBUTE {
            vec!["1.1"]
        } else {
            vec![dn_attribute]
        };

        let (entries, _res) = self
            .ldap
            .search(base, scope, filter, attrs)
            .await
            .map_err(|err| AuthError::Connection(ldap_error_message(&err)))?
            .success()
            .map_err(|err| {
                // A non-success result code here points at the search
                // parameters (e.g. a missing base), not at the transport.
                AuthError::InvalidConfig(format!(
                    "directory search failed: {}",
                    ldap_error_message(&err)
                ))
            })?;

        if entries.is_empty() {
            return Ok(SearchOutcome::None);
        }
        if entries.len() > 1 {
            return Ok(SearchOutcome::Many);
        }

        match entries.into_iter().next() {
            Some(entry) => {
                let entry = SearchEntry::construct(entry);
                Ok(SearchOutcome::One(entry_dn(entry, dn_attribute)?))
            }
            None => Ok(SearchOutcome::None),
        }
    }

    async fn whoami(&mut self) -> Result<()> {
        self.ldap
            .extended(WhoAmI)
            .await
            .map_err(|err| AuthError::Connection(ldap_error_message(&err)))?
            .success()
            .map_err(|err| AuthError::Connection(ldap_error_message(&err)))?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.ldap.unbind().await;
    }
}

/// Bind DN of a matched entry: the entry's own DN, or the first value of
/// the configured attribute
fn entry_dn(entry: SearchEntry, dn_attribute: &str) -> Result<String> {
    if dn_attribute == ENTRY_DN_ATTRIBUTE {
        return Ok(entry.dn);
    }

    match entry.attrs.get(dn_attribute).and_then(|values| values.first()) {
        Some(dn) => Ok(dn.clone()),
        None => Err(AuthError::MissingDnAttribute(dn_attribute.to_string())),
    }
}

fn build_tls_connector(tls: &TlsOptions) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if let Some(path) = &tls.ca_cert_path {
        let bytes = fs::read(path)
            .map_err(|err| AuthError::Io(format!("failed to read CA cert file: {err}")))?;
        let ca_cert = Certificate::from_pem(&bytes)
            .map_err(|err| AuthError::Tls(format!("failed to load CA certificate: {err}")))?;
        builder.add_root_certificate(ca_cert);
    }

    if let Some(cert_path) = &tls.cert_path {
        let key_path = tls.key_path.as_ref().ok_or(AuthError::MissingTlsKeyPath)?;

        let cert_bytes = fs::read(cert_path)
            .map_err(|err| AuthError::Io(format!("failed to read client certificate: {err}")))?;
        let key_bytes = fs::read(key_path)
            .map_err(|err| AuthError::Io(format!("failed to read client key: {err}")))?;
        let identity = Identity::from_pkcs8(&cert_bytes, &key_bytes)
            .map_err(|err| AuthError::Tls(format!("failed to load client certificate: {err}")))?;
        builder.identity(identity);
    }

    builder
        .build()
        .map_err(|err| AuthError::Tls(format!("failed to set up TLS connector: {err}")))
}

/// Active Directory diagnostics sometimes carry a trailing NUL; strip it so
/// the message is safe to log and compare.
fn ldap_error_message(err: &LdapError) -> String {
    err.to_string().replace('\0', "")
}
