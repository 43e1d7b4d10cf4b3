//! Sent-mail audit boundary. Best effort: a failing audit log never changes
//! a delivery outcome.

use async_trait::async_trait;

use crate::message::QueuedMessage;

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_sent(&self, message: &QueuedMessage) -> eyre::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullAuditLog;

#[async_trait]
impl AuditLog for NullAuditLog {
    async fn record_sent(&self, _message: &QueuedMessage) -> eyre::Result<()> {
        Ok(())
    }
}
