//! Startup provisioning of the dead-letter topology.
//!
//! Only dead-letter exchanges and queues are declared here. The work queues
//! belong to the worker processes, which declare them with their arguments
//! before consuming.

use std::sync::Arc;

use tracing::info;

use crate::broker::{ExchangeKind, QueueDeclaration};
use crate::connection::ConnectionManager;
use crate::errors::Result;
use crate::queue::topology::{validate_topology, DEAD_LETTERS};

pub struct InfrastructureInitializer {
    connection: Arc<ConnectionManager>,
}

impl InfrastructureInitializer {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Declare every DLX, its DLQ, and the binding between them.
    ///
    /// Idempotent on the broker side. Connection failures are returned: the
    /// process should not start publishing without dead-letter routing.
    pub async fn execute(&self) -> Result<()> {
        if !self.connection.config().jobs_enabled {
            info!("jobs_setup_skipped_disabled");
            return Ok(());
        }

        validate_topology()?;

        let session = self.connection.ensure_connected().await?;
        let channel = session.pool.checkout().await?;

        for dlx in DEAD_LETTERS {
            channel
                .exchange_declare(dlx.exchange_name, ExchangeKind::Fanout, true)
                .await?;
            channel
                .queue_declare(&QueueDeclaration::durable(dlx.queue_name))
                .await?;
            channel.queue_bind(dlx.queue_name, dlx.exchange_name, "").await?;

            info!(
                exchange = dlx.exchange_name,
                queue = dlx.queue_name,
                "jobs_dead_letter_declared"
            );
        }

        info!(count = DEAD_LETTERS.len(), "jobs_setup_complete");
        Ok(())
    }
}
