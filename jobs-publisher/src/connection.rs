//! Broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the process's single broker connection and the
//! channel pool built on it. Publishers clone the current [`Session`] out of
//! a short read lock, so a reconnect can swap sessions without waiting for
//! in-flight publishes; those finish (or fail) against the old session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::broker::{BrokerConnection, ChannelPool, Connector};
use crate::config::Config;
use crate::errors::{BrokerError, JobsError, Result};

/// A live connection and its channel pool.
pub struct Session {
    pub connection: Arc<dyn BrokerConnection>,
    pub pool: ChannelPool,
}

pub struct ConnectionManager {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    session: RwLock<Option<Arc<Session>>>,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            session: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The current session, or the configuration error publishers surface.
    pub async fn session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(JobsError::ChannelPoolNotInitialized)
    }

    pub async fn is_connected(&self) -> bool {
        match self.session.read().await.as_ref() {
            Some(session) => session.connection.is_open(),
            None => false,
        }
    }

    /// Connect unless an open session already exists. Errors are returned.
    ///
    /// The connect runs without holding the session lock, so publishers keep
    /// failing fast against the old (or missing) session meanwhile.
    pub async fn ensure_connected(&self) -> Result<Arc<Session>> {
        if let Some(session) = self.open_session_if_any().await {
            return Ok(session);
        }

        let fresh = Arc::new(self.open_session().await?);

        let mut slot = self.session.write().await;
        let current = slot.as_ref().filter(|s| s.connection.is_open()).cloned();
        if let Some(current) = current {
            // Lost the race to a concurrent connect
            drop(slot);
            close_session(&fresh).await;
            return Ok(current);
        }

        let stale = slot.replace(Arc::clone(&fresh));
        drop(slot);
        if let Some(stale) = stale {
            close_session(&stale).await;
        }

        Ok(fresh)
    }

    async fn open_session_if_any(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|s| s.connection.is_open())
            .cloned()
    }

    /// Open a fresh connection and pool, bounded by the connect timeout.
    async fn open_session(&self) -> Result<Session> {
        let timeout = self.config.connect_timeout();

        let connection = tokio::time::timeout(timeout, self.connector.connect(&self.config.broker_url))
            .await
            .map_err(|_| BrokerError::ConnectTimeout(timeout))??;

        let pool = ChannelPool::new(
            Arc::clone(&connection),
            self.config.channel_pool_size,
            self.config.channel_pool_timeout(),
        );

        info!(
            broker_url = %self.config.redacted_broker_url(),
            pool_size = pool.size(),
            "jobs_connection_established"
        );

        Ok(Session { connection, pool })
    }

    /// Close the connection and forget it. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let stale = self.session.write().await.take();

        match stale {
            Some(session) => {
                close_session(&session).await;
                info!("jobs_disconnected");
            }
            None => info!("jobs_disconnect_noop"),
        }
    }

    /// Replace the connection with a fresh one.
    ///
    /// Best effort: failures are logged, never returned, so a health-check loop
    /// can call this freely. Does nothing when jobs are disabled.
    pub async fn reconnect(&self) {
        if !self.config.jobs_enabled {
            info!("jobs_reconnect_skipped_disabled");
            return;
        }

        let session = match self.open_session().await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!(error = %e, "jobs_reconnect_failed");
                return;
            }
        };

        let stale = self.session.write().await.replace(session);
        if let Some(stale) = stale {
            close_session(&stale).await;
        }

        info!("jobs_reconnected");
    }

    /// Health-check loop: every `interval`, reconnect if the connection is
    /// down. Returns once `shutdown` completes.
    pub async fn supervise<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("jobs_supervisor_stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if !self.is_connected().await {
                        warn!("jobs_connection_down");
                        self.reconnect().await;
                    }
                }
            }
        }
    }
}

/// Close a session's connection, logging instead of failing.
async fn close_session(session: &Session) {
    session.pool.shutdown();

    if !session.connection.is_open() {
        return;
    }

    if let Err(e) = session.connection.close().await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }
}
