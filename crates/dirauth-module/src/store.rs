//! Configuration store
//!
//! String-keyed option surface exposed to the host's CONFIG SET / CONFIG GET
//! commands. Every write builds and validates a complete candidate snapshot
//! before committing, so a rejected value leaves both the store and the
//! running engine untouched. Reading the search principal's password always
//! yields a redaction token, never the secret.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use url::Url;

use dirauth_core::config::{AuthMode, SearchScope, TlsOptions};
use dirauth_core::{AuthConfig, AuthError, Result, ENTRY_DN_ATTRIBUTE, REDACTED_SECRET};

pub const KEY_SERVERS: &str = "servers";
pub const KEY_AUTH_ENABLED: &str = "auth_enabled";
pub const KEY_AUTH_MODE: &str = "auth_mode";
pub const KEY_BIND_DN_PREFIX: &str = "bind_dn_prefix";
pub const KEY_BIND_DN_SUFFIX: &str = "bind_dn_suffix";
pub const KEY_TLS_CA_CERT_PATH: &str = "tls_ca_cert_path";
pub const KEY_TLS_CERT_PATH: &str = "tls_cert_path";
pub const KEY_TLS_KEY_PATH: &str = "tls_key_path";
pub const KEY_USE_STARTTLS: &str = "use_starttls";
pub const KEY_SEARCH_BASE: &str = "search_base";
pub const KEY_SEARCH_SCOPE: &str = "search_scope";
pub const KEY_SEARCH_FILTER: &str = "search_filter";
pub const KEY_SEARCH_ATTRIBUTE: &str = "search_attribute";
pub const KEY_SEARCH_DN_ATTRIBUTE: &str = "search_dn_attribute";
pub const KEY_SEARCH_BIND_DN: &str = "search_bind_dn";
pub const KEY_SEARCH_BIND_PASSWD: &str = "search_bind_passwd";
pub const KEY_CONNECTION_POOL_SIZE: &str = "connection_pool_size";
pub const KEY_FAILURE_DETECTOR_INTERVAL: &str = "failure_detector_interval";

/// Every recognized option, in the order the status command lists them
pub const CONFIG_KEYS: &[&str] = &[
    KEY_SERVERS,
    KEY_AUTH_ENABLED,
    KEY_AUTH_MODE,
    KEY_BIND_DN_PREFIX,
    KEY_BIND_DN_SUFFIX,
    KEY_TLS_CA_CERT_PATH,
    KEY_TLS_CERT_PATH,
    KEY_TLS_KEY_PATH,
    KEY_USE_STARTTLS,
    KEY_SEARCH_BASE,
    KEY_SEARCH_SCOPE,
    KEY_SEARCH_FILTER,
    KEY_SEARCH_ATTRIBUTE,
    KEY_SEARCH_DN_ATTRIBUTE,
    KEY_SEARCH_BIND_DN,
    KEY_SEARCH_BIND_PASSWD,
    KEY_CONNECTION_POOL_SIZE,
    KEY_FAILURE_DETECTOR_INTERVAL,
];

fn default_values() -> HashMap<String, String> {
    let mut values = HashMap::new();
    for key in CONFIG_KEYS {
        values.insert(key.to_string(), String::new());
    }
    values.insert(KEY_AUTH_ENABLED.to_string(), "yes".to_string());
    values.insert(KEY_AUTH_MODE.to_string(), "bind".to_string());
    values.insert(KEY_BIND_DN_PREFIX.to_string(), "cn=".to_string());
    values.insert(KEY_USE_STARTTLS.to_string(), "no".to_string());
    values.insert(KEY_SEARCH_SCOPE.to_string(), "sub".to_string());
    values.insert(
        KEY_SEARCH_DN_ATTRIBUTE.to_string(),
        ENTRY_DN_ATTRIBUTE.to_string(),
    );
    values.insert(KEY_CONNECTION_POOL_SIZE.to_string(), "2".to_string());
    values.insert(KEY_FAILURE_DETECTOR_INTERVAL.to_string(), "1".to_string());
    values
}

/// Raw option values with validated-snapshot builds on write
pub struct ConfigStore {
    values: RwLock<HashMap<String, String>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(default_values()),
        }
    }

    /// Set one option. The whole candidate snapshot is built and validated
    /// before the raw value is committed; on error nothing changes. Returns
    /// the new snapshot for the engine to install.
    pub fn set(&self, key: &str, value: &str) -> Result<AuthConfig> {
        if !CONFIG_KEYS.contains(&key) {
            return Err(AuthError::InvalidConfig(format!(
                "unknown config option '{key}'"
            )));
        }

        let mut values = self.values.write();
        let mut candidate = values.clone();
        candidate.insert(key.to_string(), value.to_string());

        let config = build_config(&candidate)?;
        config.validate()?;

        *values = candidate;
        Ok(config)
    }

    /// Read one option's raw value. Secrets come back as a redaction token.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = self.values.read().get(key).cloned()?;
        if key == KEY_SEARCH_BIND_PASSWD && !value.is_empty() {
            return Some(REDACTED_SECRET.to_string());
        }
        Some(value)
    }

    /// Every option with its (redacted) value, in listing order
    pub fn entries(&self) -> Vec<(String, String)> {
        CONFIG_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }

    /// Snapshot built from the current raw values
    pub fn config(&self) -> Result<AuthConfig> {
        build_config(&self.values.read())
    }
}

fn raw<'a>(values: &'a HashMap<String, String>, key: &str) -> &'a str {
    values.get(key).map(String::as_str).unwrap_or_default()
}

fn opt(values: &HashMap<String, String>, key: &str) -> Option<String> {
    let value = raw(values, key);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn build_config(values: &HashMap<String, String>) -> Result<AuthConfig> {
    let mut servers = Vec::new();
    for entry in raw(values, KEY_SERVERS).split_whitespace() {
        let url = Url::parse(entry).map_err(|err| {
            AuthError::InvalidConfig(format!("invalid server URL '{entry}': {err}"))
        })?;
        servers.push(url);
    }

    let pool_size = raw(values, KEY_CONNECTION_POOL_SIZE)
        .parse::<usize>()
        .map_err(|_| {
            AuthError::InvalidConfig(format!(
                "connection_pool_size must be a positive integer, got '{}'",
                raw(values, KEY_CONNECTION_POOL_SIZE)
            ))
        })?;

    let interval_secs = raw(values, KEY_FAILURE_DETECTOR_INTERVAL)
        .parse::<u64>()
        .map_err(|_| {
            AuthError::InvalidConfig(format!(
                "failure_detector_interval must be a number of seconds, got '{}'",
                raw(values, KEY_FAILURE_DETECTOR_INTERVAL)
            ))
        })?;
    if interval_secs == 0 {
        return Err(AuthError::InvalidConfig(
            "failure_detector_interval must be at least 1 second".to_string(),
        ));
    }

    Ok(AuthConfig {
        enabled: parse_bool(KEY_AUTH_ENABLED, raw(values, KEY_AUTH_ENABLED))?,
        mode: AuthMode::parse(raw(values, KEY_AUTH_MODE))?,
        servers,
        tls: TlsOptions {
            ca_cert_path: opt(values, KEY_TLS_CA_CERT_PATH).map(PathBuf::from),
            cert_path: opt(values, KEY_TLS_CERT_PATH).map(PathBuf::from),
            key_path: opt(values, KEY_TLS_KEY_PATH).map(PathBuf::from),
            use_starttls: parse_bool(KEY_USE_STARTTLS, raw(values, KEY_USE_STARTTLS))?,
        },
        bind_dn_prefix: raw(values, KEY_BIND_DN_PREFIX).to_string(),
        bind_dn_suffix: raw(values, KEY_BIND_DN_SUFFIX).to_string(),
        search_base: opt(values, KEY_SEARCH_BASE),
        search_scope: SearchScope::parse(raw(values, KEY_SEARCH_SCOPE))?,
        search_filter: opt(values, KEY_SEARCH_FILTER),
        search_attribute: opt(values, KEY_SEARCH_ATTRIBUTE),
        // An emptied value falls back to the entry's own DN.
        search_dn_attribute: opt(values, KEY_SEARCH_DN_ATTRIBUTE)
            .unwrap_or_else(|| ENTRY_DN_ATTRIBUTE.to_string()),
        search_bind_dn: opt(values, KEY_SEARCH_BIND_DN),
        search_bind_passwd: opt(values, KEY_SEARCH_BIND_PASSWD),
        connection_pool_size: pool_size,
        probe_interval: Duration::from_secs(interval_secs),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        other => Err(AuthError::InvalidConfig(format!(
            "{key} must be 'yes' or 'no', got '{other}'"
        ))),
    }
}
