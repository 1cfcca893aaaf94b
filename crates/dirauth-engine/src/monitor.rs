//! Health monitor
//!
//! Fixed-interval background task probing every currently unhealthy
//! endpoint: connect with the configured transport, issue a WhoAmI, close.
//! Probe success promotes the endpoint back to healthy. Healthy endpoints
//! are not proactively probed; they demote only from real traffic. Each
//! probe is individually bounded so one unreachable endpoint cannot stall
//! registry visibility for the others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use dirauth_core::{AuthConfig, PROBE_TIMEOUT};

use crate::connector::DirectoryConnector;
use crate::engine::ConfigHolder;
use crate::registry::{ServerEndpoint, ServerRegistry};

struct StopSignal {
    flag: AtomicBool,
    notify: Notify,
}

pub struct HealthMonitor {
    stop: Arc<StopSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub(crate) fn start(
        registry: Arc<ServerRegistry>,
        connector: Arc<dyn DirectoryConnector>,
        config: Arc<ConfigHolder>,
    ) -> Self {
        let stop = Arc::new(StopSignal {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let task_stop = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            debug!("health monitor started");

            loop {
                let interval = config.snapshot().probe_interval;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = task_stop.notify.notified() => {}
                }

                if task_stop.flag.load(Ordering::Acquire) {
                    break;
                }

                let snapshot = config.snapshot();
                probe_round(&registry, connector.as_ref(), &snapshot).await;
            }

            debug!("health monitor stopped");
        });

        Self {
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Wake the probe loop so a reconfigured interval takes effect now
    /// instead of after the in-flight sleep.
    pub(crate) fn reconfigure(&self) {
        self.stop.notify.notify_one();
    }

    /// Stop the probe loop and wait for it to finish. No probe outlives
    /// this call.
    ///
    /// `notify_one` stores a permit when the loop is mid-probe rather than
    /// waiting, so the stop flag is observed as soon as the round ends
    /// instead of after another full interval.
    pub async fn shutdown(&self) {
        self.stop.flag.store(true, Ordering::Release);
        self.stop.notify.notify_one();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                error!("health monitor task panicked during shutdown");
            }
        }
    }
}

async fn probe_round(
    registry: &ServerRegistry,
    connector: &dyn DirectoryConnector,
    config: &AuthConfig,
) {
    let targets = registry.unhealthy();
    if targets.is_empty() {
        return;
    }

    future::join_all(
        targets
            .iter()
            .map(|endpoint| probe_endpoint(endpoint, connector, config)),
    )
    .await;
}

async fn probe_endpoint(
    endpoint: &ServerEndpoint,
    connector: &dyn DirectoryConnector,
    config: &AuthConfig,
) {
    let started = Instant::now();

    let outcome = tokio::time::timeout(PROBE_TIMEOUT, async {
        let mut conn = connector.connect(endpoint.url(), config).await?;
        let result = conn.whoami().await;
        conn.close().await;
        result
    })
    .await;

    endpoint.record_probe();
    match outcome {
        Ok(Ok(())) => endpoint.mark_healthy(Some(started.elapsed())),
        Ok(Err(err)) => endpoint.record_probe_failure(&err.to_string()),
        Err(_) => endpoint.record_probe_failure("probe timed out"),
    }
}
