//! Engine context
//!
//! Owns the pieces of a running authentication engine: the installed
//! configuration, the server registry, the per-endpoint connection pools,
//! the transport connector and the health monitor. `authenticate` walks the
//! candidate endpoints in priority order and fails over on transport faults
//! only; a credential rejection is an answer, not an outage.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use dirauth_core::types::{AuthSuccess, EndpointStatus};
use dirauth_core::{AuthConfig, AuthError, Result};

use crate::connector::DirectoryConnector;
use crate::monitor::HealthMonitor;
use crate::pool::PoolSet;
use crate::registry::ServerRegistry;
use crate::strategy::strategy_for;

/// Swappable configuration snapshot. Readers take an `Arc` and keep a
/// consistent view for the whole operation even if a reload lands mid-way.
pub(crate) struct ConfigHolder {
    current: RwLock<Arc<AuthConfig>>,
}

impl ConfigHolder {
    pub(crate) fn new(config: AuthConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<AuthConfig> {
        Arc::clone(&self.current.read())
    }

    pub(crate) fn install(&self, config: AuthConfig) {
        *self.current.write() = Arc::new(config);
    }
}

/// A running authentication engine
pub struct EngineContext {
    config: Arc<ConfigHolder>,
    registry: Arc<ServerRegistry>,
    pools: PoolSet,
    connector: Arc<dyn DirectoryConnector>,
    monitor: HealthMonitor,
}

impl EngineContext {
    /// Start an engine with the default configuration and no servers. Spawns
    /// the health monitor, so this must run inside a tokio runtime.
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> Self {
        let config = Arc::new(ConfigHolder::new(AuthConfig::default()));
        let registry = Arc::new(ServerRegistry::new());

        let monitor = HealthMonitor::start(
            Arc::clone(&registry),
            Arc::clone(&connector),
            Arc::clone(&config),
        );

        Self {
            config,
            registry,
            pools: PoolSet::new(),
            connector,
            monitor,
        }
    }

    pub fn config(&self) -> Arc<AuthConfig> {
        self.config.snapshot()
    }

    /// Validate and install a new configuration. The registry is re-synced
    /// (surviving endpoints keep their health), pools of removed endpoints
    /// are closed, and a pool size change recreates every pool on next use.
    pub async fn install_config(&self, config: AuthConfig) -> Result<()> {
        config.validate()?;

        let previous = self.config.snapshot();
        let removed = self.registry.sync(&config.servers);
        for url in &removed {
            self.pools.remove(url).await;
        }

        if config.connection_pool_size != previous.connection_pool_size {
            info!(
                "connection pool size changed from {} to {}, recreating pools",
                previous.connection_pool_size, config.connection_pool_size
            );
            self.pools.reset().await;
        }

        self.config.install(config);
        self.monitor.reconfigure();
        Ok(())
    }

    /// Authenticate a user against the configured servers.
    ///
    /// Candidates are tried in configured order. A transport fault demotes
    /// the endpoint and moves on to the next one; a credential rejection or
    /// a configuration error ends the attempt immediately. Running out of
    /// candidates is `AllServersUnavailable`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthSuccess> {
        let config = self.config.snapshot();

        if self.registry.is_empty() {
            return Err(AuthError::NoServerConfigured);
        }

        let candidates = self.registry.candidates();
        if candidates.is_empty() {
            warn!("no reachable directory server to authenticate against");
            return Err(AuthError::AllServersUnavailable);
        }

        let strategy = strategy_for(config.mode);

        for endpoint in candidates {
            let pool = self.pools.pool_for(endpoint.url(), config.connection_pool_size);

            let mut pooled = match pool
                .acquire(endpoint.url(), &config, self.connector.as_ref())
                .await
            {
                Ok(pooled) => pooled,
                Err(AuthError::PoolExhausted) => {
                    // Saturated is not down: leave the health state alone
                    // and try the next endpoint.
                    warn!("connection pool for {} is exhausted", endpoint.url());
                    continue;
                }
                Err(err) => {
                    endpoint.mark_unhealthy(&err.to_string());
                    warn!("failed to connect to {}: {}", endpoint.url(), err);
                    continue;
                }
            };

            match strategy
                .authenticate(pooled.connection(), &config, username, password)
                .await
            {
                Ok(success) => {
                    endpoint.mark_healthy(None);
                    pool.release(pooled).await;
                    debug!("authenticated '{}' against {}", username, endpoint.url());
                    return Ok(success);
                }
                Err(err) if err.is_credential_rejection() => {
                    // The server answered; it is healthy and the connection
                    // is reusable.
                    endpoint.mark_healthy(None);
                    pool.release(pooled).await;
                    return Err(err);
                }
                Err(err) if err.is_transport_fault() => {
                    endpoint.mark_unhealthy(&err.to_string());
                    pool.discard(pooled).await;
                    warn!("transport fault on {}: {}", endpoint.url(), err);
                }
                Err(err) => {
                    // Configuration errors (e.g. a bad search base) are the
                    // same on every endpoint; failing over would only repeat
                    // them.
                    pool.release(pooled).await;
                    return Err(err);
                }
            }
        }

        Err(AuthError::AllServersUnavailable)
    }

    /// Health snapshot of every configured endpoint, in configured order
    pub fn statuses(&self) -> Vec<EndpointStatus> {
        self.registry.statuses()
    }

    /// Stop the health monitor and close every pooled connection
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.pools.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use dirauth_core::config::{AuthMode, SearchScope};
    use dirauth_core::types::HealthState;

    use crate::connector::{BindStatus, DirectoryConnection, SearchOutcome};

    /// In-memory directory server: a DN -> password map plus canned search
    /// results keyed by filter string.
    #[derive(Default)]
    struct MockServer {
        reachable: AtomicBool,
        /// When set, binds hang forever; keeps a pooled connection occupied
        stall_binds: AtomicBool,
        users: RwLock<HashMap<String, String>>,
        search_results: RwLock<HashMap<String, Vec<String>>>,
        connects: AtomicUsize,
    }

    impl MockServer {
        fn new() -> Arc<Self> {
            let server = Self::default();
            server.reachable.store(true, Ordering::Release);
            Arc::new(server)
        }

        fn add_user(&self, dn: &str, password: &str) {
            self.users
                .write()
                .insert(dn.to_string(), password.to_string());
        }

        fn add_search_result(&self, filter: &str, dns: &[&str]) {
            self.search_results.write().insert(
                filter.to_string(),
                dns.iter().map(|dn| dn.to_string()).collect(),
            );
        }

        fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::Release);
        }
    }

    struct MockConnection {
        server: Arc<MockServer>,
    }

    #[async_trait]
    impl DirectoryConnection for MockConnection {
        async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<BindStatus> {
            if self.server.stall_binds.load(Ordering::Acquire) {
                std::future::pending::<()>().await;
            }
            if !self.server.reachable.load(Ordering::Acquire) {
                return Err(AuthError::Connection("broken pipe".to_string()));
            }
            match self.server.users.read().get(dn) {
                Some(expected) if expected == password => Ok(BindStatus::Success),
                _ => Ok(BindStatus::InvalidCredentials),
            }
        }

        async fn search_dn(
            &mut self,
            _base: &str,
            _scope: SearchScope,
            filter: &str,
            _dn_attribute: &str,
        ) -> Result<SearchOutcome> {
            if !self.server.reachable.load(Ordering::Acquire) {
                return Err(AuthError::Connection("broken pipe".to_string()));
            }
            match self.server.search_results.read().get(filter) {
                Some(dns) if dns.len() == 1 => Ok(SearchOutcome::One(dns[0].clone())),
                Some(dns) if dns.is_empty() => Ok(SearchOutcome::None),
                Some(_) => Ok(SearchOutcome::Many),
                None => Ok(SearchOutcome::None),
            }
        }

        async fn whoami(&mut self) -> Result<()> {
            if !self.server.reachable.load(Ordering::Acquire) {
                return Err(AuthError::Connection("broken pipe".to_string()));
            }
            Ok(())
        }

        async fn close(&mut self) {}
    }

    /// Connector routing to mock servers by URL
    #[derive(Default)]
    struct MockConnector {
        servers: RwLock<HashMap<String, Arc<MockServer>>>,
    }

    impl MockConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn add_server(&self, url: &str) -> Arc<MockServer> {
            let server = MockServer::new();
            self.servers
                .write()
                .insert(url.to_string(), Arc::clone(&server));
            server
        }
    }

    #[async_trait]
    impl DirectoryConnector for MockConnector {
        async fn connect(
            &self,
            server: &Url,
            _config: &AuthConfig,
        ) -> Result<Box<dyn DirectoryConnection>> {
            let target = self
                .servers
                .read()
                .get(server.as_str().trim_end_matches('/'))
                .cloned()
                .ok_or_else(|| AuthError::Connection(format!("no route to {server}")))?;

            if !target.reachable.load(Ordering::Acquire) {
                return Err(AuthError::Connection("connection refused".to_string()));
            }
            target.connects.fetch_add(1, Ordering::AcqRel);
            Ok(Box::new(MockConnection { server: target }))
        }
    }

    fn server_urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    fn bind_config(servers: &[&str]) -> AuthConfig {
        AuthConfig {
            servers: server_urls(servers),
            bind_dn_prefix: "cn=".to_string(),
            bind_dn_suffix: ",OU=devops,DC=example,DC=io".to_string(),
            ..Default::default()
        }
    }

    const USER1_DN: &str = "cn=user1,OU=devops,DC=example,DC=io";

    #[tokio::test]
    async fn test_no_server_configured() {
        let connector = MockConnector::new();
        let engine = EngineContext::new(connector);

        let err = engine.authenticate("user1", "user1@123").await.unwrap_err();
        assert_eq!(err, AuthError::NoServerConfigured);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_mode_end_to_end() {
        let connector = MockConnector::new();
        let server = connector.add_server("ldap://one.example.io");
        server.add_user(USER1_DN, "user1@123");

        let engine = EngineContext::new(connector);
        engine
            .install_config(bind_config(&["ldap://one.example.io"]))
            .await
            .unwrap();

        let success = engine.authenticate("user1", "user1@123").await.unwrap();
        assert_eq!(success.dn, USER1_DN);
        assert_eq!(engine.statuses()[0].status, HealthState::Healthy);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failover_to_secondary_on_transport_fault() {
        let connector = MockConnector::new();
        let primary = connector.add_server("ldap://one.example.io");
        let secondary = connector.add_server("ldap://two.example.io");
        primary.set_reachable(false);
        secondary.add_user(USER1_DN, "user1@123");

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine
            .install_config(bind_config(&[
                "ldap://one.example.io",
                "ldap://two.example.io",
            ]))
            .await
            .unwrap();

        let success = engine.authenticate("user1", "user1@123").await.unwrap();
        assert_eq!(success.dn, USER1_DN);

        let statuses = engine.statuses();
        assert_eq!(statuses[0].status, HealthState::Unhealthy);
        assert_eq!(statuses[1].status, HealthState::Healthy);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_credential_rejection_does_not_fail_over() {
        let connector = MockConnector::new();
        let primary = connector.add_server("ldap://one.example.io");
        let secondary = connector.add_server("ldap://two.example.io");
        primary.add_user(USER1_DN, "user1@123");
        secondary.add_user(USER1_DN, "user1@123");

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine
            .install_config(bind_config(&[
                "ldap://one.example.io",
                "ldap://two.example.io",
            ]))
            .await
            .unwrap();

        let err = engine.authenticate("user1", "wrongpass").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);

        // The second server was never contacted and the first stays healthy.
        assert_eq!(secondary.connects.load(Ordering::Acquire), 0);
        assert_eq!(engine.statuses()[0].status, HealthState::Healthy);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_unavailable_without_network_traffic() {
        let connector = MockConnector::new();
        let server = connector.add_server("ldap://one.example.io");
        server.set_reachable(false);

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine
            .install_config(bind_config(&["ldap://one.example.io"]))
            .await
            .unwrap();

        // First attempt demotes the endpoint over the network.
        let err = engine.authenticate("user1", "user1@123").await.unwrap_err();
        assert_eq!(err, AuthError::AllServersUnavailable);
        let attempts = server.connects.load(Ordering::Acquire);

        // Second attempt is answered from the registry alone.
        let err = engine.authenticate("user1", "user1@123").await.unwrap_err();
        assert_eq!(err, AuthError::AllServersUnavailable);
        assert_eq!(server.connects.load(Ordering::Acquire), attempts);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_monitor_recovers_demoted_endpoint() {
        let connector = MockConnector::new();
        let server = connector.add_server("ldap://one.example.io");
        server.add_user(USER1_DN, "user1@123");
        server.set_reachable(false);

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        let mut config = bind_config(&["ldap://one.example.io"]);
        config.probe_interval = Duration::from_millis(10);
        engine.install_config(config).await.unwrap();

        assert!(engine.authenticate("user1", "user1@123").await.is_err());
        assert_eq!(engine.statuses()[0].status, HealthState::Unhealthy);

        server.set_reachable(true);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.statuses()[0].status, HealthState::Healthy);
        let success = engine.authenticate("user1", "user1@123").await.unwrap();
        assert_eq!(success.dn, USER1_DN);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_connections_are_reused_across_authentications() {
        let connector = MockConnector::new();
        let server = connector.add_server("ldap://one.example.io");
        server.add_user(USER1_DN, "user1@123");

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine
            .install_config(bind_config(&["ldap://one.example.io"]))
            .await
            .unwrap();

        for _ in 0..5 {
            engine.authenticate("user1", "user1@123").await.unwrap();
        }

        assert_eq!(server.connects.load(Ordering::Acquire), 1);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_endpoint_fails_over_without_demotion() {
        let connector = MockConnector::new();
        let primary = connector.add_server("ldap://one.example.io");
        let secondary = connector.add_server("ldap://two.example.io");
        primary.add_user(USER1_DN, "user1@123");
        primary.stall_binds.store(true, Ordering::Release);
        secondary.add_user(USER1_DN, "user1@123");

        let engine = Arc::new(EngineContext::new(
            Arc::clone(&connector) as Arc<dyn DirectoryConnector>
        ));
        let mut config = bind_config(&["ldap://one.example.io", "ldap://two.example.io"]);
        config.connection_pool_size = 1;
        engine.install_config(config).await.unwrap();

        // Occupy the primary's only pooled connection with a bind that
        // never completes.
        let holder = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.authenticate("user1", "user1@123").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let success = engine.authenticate("user1", "user1@123").await.unwrap();
        assert_eq!(success.dn, USER1_DN);

        // Saturation is not an outage: the primary keeps its health state.
        assert_eq!(engine.statuses()[0].status, HealthState::Unknown);
        assert_eq!(engine.statuses()[1].status, HealthState::Healthy);

        holder.abort();
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_bind_mode_end_to_end() {
        let connector = MockConnector::new();
        let server = connector.add_server("ldap://one.example.io");
        server.add_user("cn=admin,dc=example,dc=io", "admin123!");
        server.add_user("uid=u2,ou=people,dc=example,dc=io", "user2@123");

        let config = AuthConfig {
            servers: server_urls(&["ldap://one.example.io"]),
            mode: AuthMode::SearchAndBind,
            search_base: Some("dc=example,dc=io".to_string()),
            search_bind_dn: Some("cn=admin,dc=example,dc=io".to_string()),
            search_bind_passwd: Some("admin123!".to_string()),
            ..Default::default()
        };
        server.add_search_result(
            &config.user_search_filter("u2"),
            &["uid=u2,ou=people,dc=example,dc=io"],
        );

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine.install_config(config).await.unwrap();

        let success = engine.authenticate("u2", "user2@123").await.unwrap();
        assert_eq!(success.dn, "uid=u2,ou=people,dc=example,dc=io");

        let err = engine.authenticate("ghost", "pw").await.unwrap_err();
        assert_eq!(err, AuthError::NoMatchingEntry("ghost".to_string()));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_closes_pools_of_removed_endpoints() {
        let connector = MockConnector::new();
        let one = connector.add_server("ldap://one.example.io");
        let two = connector.add_server("ldap://two.example.io");
        one.add_user(USER1_DN, "user1@123");
        two.add_user(USER1_DN, "user1@123");

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine
            .install_config(bind_config(&[
                "ldap://one.example.io",
                "ldap://two.example.io",
            ]))
            .await
            .unwrap();
        engine.authenticate("user1", "user1@123").await.unwrap();

        engine
            .install_config(bind_config(&["ldap://two.example.io"]))
            .await
            .unwrap();

        let statuses = engine.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].uri, "ldap://two.example.io/");

        // The surviving endpoint serves traffic with a fresh or kept pool.
        engine.authenticate("user1", "user1@123").await.unwrap();

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_without_side_effects() {
        let connector = MockConnector::new();
        connector.add_server("ldap://one.example.io");

        let engine = EngineContext::new(Arc::clone(&connector) as Arc<dyn DirectoryConnector>);
        engine
            .install_config(bind_config(&["ldap://one.example.io"]))
            .await
            .unwrap();

        let mut bad = bind_config(&["ldap://two.example.io"]);
        bad.connection_pool_size = 0;
        assert!(engine.install_config(bad).await.is_err());

        // The previous generation stays installed.
        assert_eq!(
            engine.config().servers,
            server_urls(&["ldap://one.example.io"])
        );

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_authentications_survive_a_flapping_server() {
        let connector = MockConnector::new();
        let one = connector.add_server("ldap://one.example.io");
        let two = connector.add_server("ldap://two.example.io");
        one.add_user(USER1_DN, "user1@123");
        two.add_user(USER1_DN, "user1@123");

        let engine = Arc::new(EngineContext::new(
            Arc::clone(&connector) as Arc<dyn DirectoryConnector>
        ));
        let mut config = bind_config(&["ldap://one.example.io", "ldap://two.example.io"]);
        config.connection_pool_size = 4;
        engine.install_config(config).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let engine = Arc::clone(&engine);
            let one = Arc::clone(&one);
            tasks.push(tokio::spawn(async move {
                if i == 8 {
                    one.set_reachable(false);
                }
                engine.authenticate("user1", "user1@123").await
            }));
        }

        for task in tasks {
            let result = task.await.unwrap();
            assert_eq!(result.unwrap().dn, USER1_DN);
        }

        engine.shutdown().await;
    }
}
