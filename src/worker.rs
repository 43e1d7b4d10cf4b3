//! Delivery worker.
//!
//! Drains claimed messages one at a time, invokes the transport and applies
//! the retry policy: success deletes the row and releases its attachments,
//! failure records the error text and releases the claim for the next
//! attempt. A panic inside an attempt is downgraded to a recorded failure so
//! one bad message cannot abort a drain pass.
//!
//! Workers share no in-memory state; multiple processes may drain the same
//! database and coordinate purely through row claims.

use std::{any::Any, collections::VecDeque, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::time::Instant;

use crate::{
    audit::AuditLog,
    error::Error,
    message::QueuedMessage,
    store::AttachmentStore,
    transport::Transport,
};

pub struct DeliveryWorker {
    db: SqlitePool,
    store: AttachmentStore,
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditLog>,
}

impl DeliveryWorker {
    pub(crate) fn new(
        db: SqlitePool,
        store: AttachmentStore,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            db,
            store,
            transport,
            audit,
        }
    }

    /// Claims a single row and runs one delivery attempt. Returns `false`
    /// when the row is not claimable or the attempt failed.
    pub async fn send_one(&self, id: i64) -> Result<bool, Error> {
        let mut conn = self.db.acquire().await?;

        let Some(message) = QueuedMessage::claim_one(&mut *conn, id).await? else {
            tracing::debug!(id, "message not claimable");
            return Ok(false);
        };

        self.attempt(&mut *conn, message).await
    }

    /// Bounded drain loop: claims batches and processes each claimed message
    /// until a batch comes back empty or the deadline passes. Returns the
    /// number of messages processed. A claimed batch is always finished, so
    /// the deadline is checked between batches, not between messages.
    ///
    /// A storage error aborts the pass; claims on rows the pass never got to
    /// attempt are released best-effort so they stay claimable.
    pub async fn drain_queue(&self, deadline: Instant, batch_size: u32) -> Result<u64, Error> {
        let mut processed = 0u64;
        let mut conn = self.db.acquire().await?;

        loop {
            if Instant::now() >= deadline {
                tracing::debug!(processed, "drain budget exhausted");
                break;
            }

            let mut pending =
                VecDeque::from(QueuedMessage::claim_batch(&mut *conn, batch_size).await?);
            if pending.is_empty() {
                break;
            }

            while let Some(message) = pending.pop_front() {
                let id = message.id;

                match self.attempt(&mut *conn, message).await {
                    Ok(true) => tracing::debug!(id, "delivered"),
                    Ok(false) => tracing::debug!(id, "delivery attempt failed"),
                    Err(err) => {
                        self.unclaim_remainder(&mut *conn, &pending).await;
                        return Err(err);
                    }
                }

                processed += 1;
            }
        }

        Ok(processed)
    }

    async fn unclaim_remainder(
        &self,
        conn: &mut SqliteConnection,
        pending: &VecDeque<QueuedMessage>,
    ) {
        for stuck in pending {
            if let Err(err) = QueuedMessage::unclaim(&mut *conn, stuck.id).await {
                tracing::warn!(
                    id = stuck.id,
                    %err,
                    "could not release claim after storage error"
                );
            }
        }
    }

    /// One attempt on an already-claimed message.
    async fn attempt(
        &self,
        conn: &mut SqliteConnection,
        message: QueuedMessage,
    ) -> Result<bool, Error> {
        let id = message.id;

        let outcome = AssertUnwindSafe(self.transport.send(&message))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                QueuedMessage::mark_succeeded(conn, id).await?;

                for attachment in &message.attachments {
                    if let Err(err) = self.store.release(attachment).await {
                        tracing::warn!(
                            id,
                            name = %attachment.name,
                            %err,
                            "could not release attachment"
                        );
                    }
                }

                if let Err(err) = self.audit.record_sent(&message).await {
                    tracing::warn!(id, %err, "audit log failed for sent message");
                }

                Ok(true)
            }
            Ok(Err(err)) => {
                tracing::warn!(id, error = %err, "transport failed");
                QueuedMessage::mark_failed(conn, id, &err.to_string()).await?;

                Ok(false)
            }
            Err(panic) => {
                let text = panic_text(panic);
                tracing::error!(id, error = %text, "send attempt panicked");
                QueuedMessage::mark_failed(conn, id, &text).await?;

                Ok(false)
            }
        }
    }
}

fn panic_text(panic: Box<dyn Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "send attempt panicked".to_owned()
    }
}
