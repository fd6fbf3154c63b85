//! Local billing event processing, used when jobs are disabled.

use async_trait::async_trait;

use crate::queue::BillingEvent;

/// Processes a billing event in-process instead of through the worker.
#[async_trait]
pub trait BillingProcessor: Send + Sync {
    async fn process(&self, event: &BillingEvent) -> anyhow::Result<()>;
}
