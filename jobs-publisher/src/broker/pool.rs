//! Bounded channel pool over one broker connection.
//!
//! A semaphore caps how many channels are checked out at once; idle channels
//! are kept for reuse and new ones are opened lazily up to the pool size.
//! The checkout is a guard: dropping it hands the channel back.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use super::{BrokerChannel, BrokerConnection};
use crate::errors::{BrokerError, JobsError, Result};

pub struct ChannelPool {
    connection: Arc<dyn BrokerConnection>,
    permits: Semaphore,
    idle: Mutex<Vec<Box<dyn BrokerChannel>>>,
    size: usize,
    timeout: Duration,
}

impl ChannelPool {
    pub fn new(connection: Arc<dyn BrokerConnection>, size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            connection,
            permits: Semaphore::new(size),
            idle: Mutex::new(Vec::with_capacity(size)),
            size,
            timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Borrow a channel, waiting at most the pool timeout for one to free up.
    pub async fn checkout(&self) -> Result<PooledChannel<'_>> {
        let permit = tokio::time::timeout(self.timeout, self.permits.acquire())
            .await
            .map_err(|_| JobsError::PoolTimeout(self.timeout))?
            .map_err(|_| BrokerError::ConnectionClosed)?;

        let reused = self.take_idle();
        let channel = match reused {
            Some(ch) => ch,
            None => {
                debug!(pool_size = self.size, "rabbitmq_channel_opening");
                self.connection.create_channel().await?
            }
        };

        Ok(PooledChannel {
            channel: Some(channel),
            pool: self,
            _permit: permit,
        })
    }

    /// Pop the most recently returned channel that is still open.
    fn take_idle(&self) -> Option<Box<dyn BrokerChannel>> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(ch) = idle.pop() {
            if ch.is_open() {
                return Some(ch);
            }
        }
        None
    }

    fn checkin(&self, channel: Box<dyn BrokerChannel>) {
        if !channel.is_open() {
            debug!("rabbitmq_channel_discarded");
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.push(channel);
    }

    /// Stop handing out channels. Waiters and later checkouts fail as if the
    /// connection had closed.
    pub fn shutdown(&self) {
        self.permits.close();
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// A channel borrowed from a [`ChannelPool`].
pub struct PooledChannel<'a> {
    channel: Option<Box<dyn BrokerChannel>>,
    pool: &'a ChannelPool,
    _permit: SemaphorePermit<'a>,
}

impl Deref for PooledChannel<'_> {
    type Target = dyn BrokerChannel;

    fn deref(&self) -> &Self::Target {
        // Only taken in Drop
        self.channel.as_deref().expect("pooled channel already returned")
    }
}

impl Drop for PooledChannel<'_> {
    fn drop(&mut self) {
        if let Some(ch) = self.channel.take() {
            self.pool.checkin(ch);
        }
    }
}
