//! Engine configuration snapshot
//!
//! `AuthConfig` is an immutable, fully validated snapshot of every
//! recognized option. The host's config store builds a candidate from the
//! live snapshot, validates it, and installs it atomically; readers always
//! observe one complete generation, never a mix of old and new fields.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{AuthError, Result};
use crate::{DEFAULT_POOL_SIZE, DEFAULT_PROBE_INTERVAL};

/// Authentication pattern used against the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Build a DN from the username and bind directly
    #[default]
    Bind,
    /// Resolve the DN with a search under a configured base, then bind
    SearchAndBind,
}

impl AuthMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "bind" => Ok(AuthMode::Bind),
            "search+bind" => Ok(AuthMode::SearchAndBind),
            other => Err(AuthError::InvalidConfig(format!(
                "unknown auth_mode '{other}' (expected 'bind' or 'search+bind')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Bind => "bind",
            AuthMode::SearchAndBind => "search+bind",
        }
    }
}

/// Scope of the user search in search+bind mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

impl SearchScope {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "base" => Ok(SearchScope::Base),
            "one" => Ok(SearchScope::OneLevel),
            "sub" => Ok(SearchScope::Subtree),
            other => Err(AuthError::InvalidConfig(format!(
                "unknown search_scope '{other}' (expected 'base', 'one' or 'sub')"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Base => "base",
            SearchScope::OneLevel => "one",
            SearchScope::Subtree => "sub",
        }
    }
}

/// Transport security material
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// CA certificate used to validate the server
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate presented to the server
    pub cert_path: Option<PathBuf>,
    /// Private key for the client certificate
    pub key_path: Option<PathBuf>,
    /// Upgrade a plaintext connection to TLS after connecting
    pub use_starttls: bool,
}

/// Immutable engine configuration snapshot
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Master switch; when off the host's local credential check is the
    /// sole authority
    pub enabled: bool,
    pub mode: AuthMode,
    /// Ordered endpoint list; the order is the failover priority
    pub servers: Vec<Url>,
    pub tls: TlsOptions,
    /// Literal prefix prepended to the username in bind mode
    pub bind_dn_prefix: String,
    /// Literal suffix appended to the username in bind mode, verbatim
    pub bind_dn_suffix: String,
    pub search_base: Option<String>,
    pub search_scope: SearchScope,
    /// Extra filter ANDed with the username match; defaults to objectClass=*
    pub search_filter: Option<String>,
    /// Attribute matched against the presented username
    pub search_attribute: Option<String>,
    /// Attribute whose value becomes the bind DN; `entryDN` selects the
    /// matched entry's own DN
    pub search_dn_attribute: String,
    pub search_bind_dn: Option<String>,
    /// Write-only secret; introspection returns a redaction token instead
    pub search_bind_passwd: Option<String>,
    /// Maximum pooled connections per endpoint
    pub connection_pool_size: usize,
    /// Interval between health probe rounds
    pub probe_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AuthMode::Bind,
            servers: Vec::new(),
            tls: TlsOptions::default(),
            bind_dn_prefix: "cn=".to_string(),
            bind_dn_suffix: String::new(),
            search_base: None,
            search_scope: SearchScope::Subtree,
            search_filter: None,
            search_attribute: None,
            search_dn_attribute: crate::ENTRY_DN_ATTRIBUTE.to_string(),
            search_bind_dn: None,
            search_bind_passwd: None,
            connection_pool_size: DEFAULT_POOL_SIZE,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl AuthConfig {
    /// Build the target DN for bind mode. Prefix and suffix are literals,
    /// appended verbatim (including any leading separator in the suffix).
    pub fn bind_dn(&self, username: &str) -> String {
        format!("{}{}{}", self.bind_dn_prefix, username, self.bind_dn_suffix)
    }

    /// Build the user search filter for search+bind mode
    pub fn user_search_filter(&self, username: &str) -> String {
        let filter = self.search_filter.as_deref().unwrap_or("objectClass=*");
        let attribute = self.search_attribute.as_deref().unwrap_or("uid");
        format!("(&({filter})({attribute}={username}))")
    }

    /// Whether the given endpoint requires a TLS-capable transport
    pub fn requires_tls(&self, server: &Url) -> bool {
        server.scheme() == "ldaps" || self.tls.use_starttls
    }

    /// Validate the snapshot as a whole. Called before install; on failure
    /// the previous snapshot stays live.
    pub fn validate(&self) -> Result<()> {
        for server in &self.servers {
            match server.scheme() {
                "ldap" => {}
                "ldaps" => {
                    if self.tls.use_starttls {
                        return Err(AuthError::InvalidConfig(format!(
                            "use_starttls cannot be combined with the ldaps:// endpoint '{server}'"
                        )));
                    }
                }
                other => {
                    return Err(AuthError::InvalidConfig(format!(
                        "unsupported scheme '{other}' in server '{server}' (expected ldap:// or ldaps://)"
                    )));
                }
            }
        }

        if self.mode == AuthMode::SearchAndBind {
            if self.search_base.as_deref().unwrap_or("").is_empty() {
                return Err(AuthError::InvalidConfig(
                    "search+bind mode requires a non-empty search_base".to_string(),
                ));
            }
            if self.search_bind_dn.as_deref().unwrap_or("").is_empty() {
                return Err(AuthError::InvalidConfig(
                    "search+bind mode requires a non-empty search_bind_dn".to_string(),
                ));
            }
        }

        if self.tls.cert_path.is_some() && self.tls.key_path.is_none() {
            return Err(AuthError::MissingTlsKeyPath);
        }

        if self.connection_pool_size == 0 {
            return Err(AuthError::InvalidConfig(
                "connection_pool_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_server(url: &str) -> AuthConfig {
        AuthConfig {
            servers: vec![Url::parse(url).unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn test_bind_dn_appends_suffix_verbatim() {
        let config = AuthConfig {
            bind_dn_prefix: "cn=".to_string(),
            bind_dn_suffix: ",OU=devops,DC=example,DC=io".to_string(),
            ..Default::default()
        };

        assert_eq!(config.bind_dn("user1"), "cn=user1,OU=devops,DC=example,DC=io");
    }

    #[test]
    fn test_user_search_filter_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.user_search_filter("u2"), "(&(objectClass=*)(uid=u2))");
    }

    #[test]
    fn test_user_search_filter_with_overrides() {
        let config = AuthConfig {
            search_filter: Some("objectClass=person".to_string()),
            search_attribute: Some("sAMAccountName".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.user_search_filter("u2"),
            "(&(objectClass=person)(sAMAccountName=u2))"
        );
    }

    #[test]
    fn test_starttls_and_ldaps_are_mutually_exclusive() {
        let mut config = config_with_server("ldaps://ldap.example.io");
        config.tls.use_starttls = true;

        assert!(matches!(config.validate(), Err(AuthError::InvalidConfig(_))));

        config.tls.use_starttls = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let config = config_with_server("http://ldap.example.io");
        assert!(matches!(config.validate(), Err(AuthError::InvalidConfig(_))));
    }

    #[test]
    fn test_search_mode_requires_base_and_principal() {
        let mut config = config_with_server("ldap://ldap.example.io");
        config.mode = AuthMode::SearchAndBind;

        assert!(config.validate().is_err());

        config.search_base = Some("dc=example,dc=io".to_string());
        assert!(config.validate().is_err());

        config.search_bind_dn = Some("cn=admin,dc=example,dc=io".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_cert_requires_key() {
        let mut config = config_with_server("ldap://ldap.example.io");
        config.tls.cert_path = Some("/etc/dirauth/client.crt".into());

        assert!(matches!(config.validate(), Err(AuthError::MissingTlsKeyPath)));

        config.tls.key_path = Some("/etc/dirauth/client.key".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let mut config = config_with_server("ldap://ldap.example.io");
        config.connection_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(AuthMode::parse("bind").unwrap(), AuthMode::Bind);
        assert_eq!(AuthMode::parse("search+bind").unwrap(), AuthMode::SearchAndBind);
        assert!(AuthMode::parse("simple").is_err());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!(SearchScope::parse("base").unwrap(), SearchScope::Base);
        assert_eq!(SearchScope::parse("one").unwrap(), SearchScope::OneLevel);
        assert_eq!(SearchScope::parse("sub").unwrap(), SearchScope::Subtree);
        assert!(SearchScope::parse("tree").is_err());
    }
}
