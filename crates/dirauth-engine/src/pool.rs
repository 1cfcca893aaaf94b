//! Connection pooling
//!
//! Each endpoint gets its own pool of up to `connection_pool_size` reusable
//! connections. Acquisition reuses an idle connection, opens a new one under
//! the cap, or waits (bounded) for a release. A transport fault discards the
//! connection; a credential rejection does not. An epoch counter invalidates
//! connections checked out across a reload or shutdown: returning a
//! stale-epoch connection closes it instead of pooling it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;
use url::Url;

use dirauth_core::{AuthConfig, AuthError, Result, ACQUIRE_TIMEOUT};

use crate::connector::{DirectoryConnection, DirectoryConnector};

/// A connection checked out of an endpoint pool
pub struct PooledConnection {
    conn: Box<dyn DirectoryConnection>,
    epoch: u64,
}

impl PooledConnection {
    pub fn connection(&mut self) -> &mut dyn DirectoryConnection {
        &mut *self.conn
    }
}

struct PoolInner {
    idle: VecDeque<Box<dyn DirectoryConnection>>,
    /// Idle plus checked-out connections in the current epoch
    open: usize,
    epoch: u64,
}

/// Pool of reusable connections for one endpoint
pub struct EndpointPool {
    inner: Mutex<PoolInner>,
    signal: Notify,
    capacity: usize,
}

impl EndpointPool {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                open: 0,
                epoch: 0,
            }),
            signal: Notify::new(),
            capacity,
        }
    }

    /// Acquire a connection: reuse an idle one, open a new one under the
    /// cap, or wait for a release. Waiting is bounded by the acquire
    /// timeout; timing out is a transport fault.
    pub async fn acquire(
        &self,
        server: &Url,
        config: &AuthConfig,
        connector: &dyn DirectoryConnector,
    ) -> Result<PooledConnection> {
        let deadline = tokio::time::Instant::now() + ACQUIRE_TIMEOUT;

        loop {
            let notified = self.signal.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.inner.lock().await;

                if let Some(conn) = inner.idle.pop_front() {
                    return Ok(PooledConnection {
                        conn,
                        epoch: inner.epoch,
                    });
                }

                if inner.open < self.capacity {
                    inner.open += 1;
                    let epoch = inner.epoch;
                    drop(inner);

                    match connector.connect(server, config).await {
                        Ok(conn) => return Ok(PooledConnection { conn, epoch }),
                        Err(err) => {
                            let mut inner = self.inner.lock().await;
                            if inner.epoch == epoch {
                                inner.open -= 1;
                            }
                            self.signal.notify_one();
                            return Err(err);
                        }
                    }
                }

                // Saturated: register for the release signal while still
                // holding the lock, so no release slips between unlock and
                // wait.
                notified.as_mut().enable();
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(AuthError::PoolExhausted);
            }
        }
    }

    /// Return a healthy connection for reuse
    pub async fn release(&self, mut pooled: PooledConnection) {
        let mut inner = self.inner.lock().await;

        if inner.epoch == pooled.epoch {
            inner.idle.push_back(pooled.conn);
            drop(inner);
            self.signal.notify_one();
        } else {
            drop(inner);
            pooled.conn.close().await;
        }
    }

    /// Close a connection after a transport fault, freeing its slot
    pub async fn discard(&self, mut pooled: PooledConnection) {
        {
            let mut inner = self.inner.lock().await;
            if inner.epoch == pooled.epoch {
                inner.open -= 1;
            }
        }
        pooled.conn.close().await;
        self.signal.notify_one();
    }

    /// Close every pooled connection and invalidate outstanding ones
    pub async fn close_all(&self) {
        let mut idle = {
            let mut inner = self.inner.lock().await;
            inner.epoch += 1;
            inner.open = 0;
            std::mem::take(&mut inner.idle)
        };

        for conn in idle.iter_mut() {
            conn.close().await;
        }
        self.signal.notify_waiters();
    }

    #[cfg(test)]
    async fn idle_count(&self) -> usize {
        self.inner.lock().await.idle.len()
    }
}

/// Per-endpoint pool map owned by the engine context
#[derive(Default)]
pub struct PoolSet {
    pools: parking_lot::RwLock<HashMap<String, Arc<EndpointPool>>>,
}

impl PoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool for an endpoint, created on first use with the configured cap
    pub fn pool_for(&self, server: &Url, capacity: usize) -> Arc<EndpointPool> {
        if let Some(pool) = self.pools.read().get(server.as_str()) {
            return Arc::clone(pool);
        }

        let mut pools = self.pools.write();
        Arc::clone(
            pools
                .entry(server.as_str().to_string())
                .or_insert_with(|| Arc::new(EndpointPool::new(capacity))),
        )
    }

    /// Close and drop the pool of a removed endpoint
    pub async fn remove(&self, server: &Url) {
        let pool = self.pools.write().remove(server.as_str());
        if let Some(pool) = pool {
            debug!("closing connection pool for removed endpoint {}", server);
            pool.close_all().await;
        }
    }

    /// Close every pool and forget them; pools are recreated on demand with
    /// the current configuration
    pub async fn reset(&self) {
        let pools: Vec<_> = {
            let mut map = self.pools.write();
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.close_all().await;
        }
    }

    /// Drain and close everything; used on engine shutdown
    pub async fn shutdown(&self) {
        self.reset().await;
    }
}
