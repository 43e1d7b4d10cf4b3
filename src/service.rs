//! Queue service: the write side of the delivery queue.
//!
//! [`Service::send`] validates a message, caches its attachments into the
//! durable store and persists the row. For priority-0 messages, or when the
//! `send_immediately` flag is set, the delivery attempt runs synchronously
//! before `send` returns. Everything else waits for the periodic drain.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    Acquire, SqlitePool,
};
use tokio::time::Instant;

use crate::{
    audit::{AuditLog, NullAuditLog},
    config::Config,
    error::Error,
    message::{NewMessage, QueuedMessage, PRIORITY_IMMEDIATE},
    render::TemplateRenderer,
    store::AttachmentStore,
    transport::Transport,
    validate::{StandardValidator, Validator},
    worker::DeliveryWorker,
};

/// Acceptance result of [`Service::send`]. `delivered` is only populated for
/// fast-lane messages and reflects the immediate attempt, not the final
/// fate of the message.
#[derive(Debug, Clone, Copy)]
pub struct SendReceipt {
    pub id: i64,
    pub delivered: Option<bool>,
}

pub struct Service {
    db: SqlitePool,
    config: Config,
    store: AttachmentStore,
    validator: Arc<dyn Validator>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    worker: DeliveryWorker,
}

#[bon::bon]
impl Service {
    #[builder(finish_fn = call)]
    pub async fn connect_with(
        config: Config,
        transport: Arc<dyn Transport>,
        validator: Option<Arc<dyn Validator>>,
        renderer: Option<Arc<dyn TemplateRenderer>>,
        audit: Option<Arc<dyn AuditLog>>,
    ) -> eyre::Result<Self> {
        let opts = if let Some(path) = config.db_path() {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new().in_memory(true)
        }
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .locking_mode(SqliteLockingMode::Normal)
        .optimize_on_close(true, None)
        .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let store = AttachmentStore::open(config.attachment_dir()).await?;
        let validator = validator.unwrap_or_else(|| Arc::new(StandardValidator));
        let audit = audit.unwrap_or_else(|| Arc::new(NullAuditLog));

        let worker = DeliveryWorker::new(pool.clone(), store.clone(), transport, audit);

        Ok(Self {
            db: pool,
            config,
            store,
            validator,
            renderer,
            worker,
        })
    }
}

impl Service {
    /// Accepts a message into the queue.
    ///
    /// Rejection-time failures (validation, template rendering, attachment
    /// caching) leave no durable state behind. Once this returns `Ok`, the
    /// row exists and delivery is the worker's problem; a fast-lane
    /// transport failure is reported through `delivered`, never as an error.
    pub async fn send(&self, message: NewMessage) -> Result<SendReceipt, Error> {
        let message = self.materialize(message).await?;

        self.validator
            .validate(&message)
            .map_err(|rejection| Error::rejected(rejection.to_string()))?;

        let queued_at = Utc::now();
        let seed = queued_at.timestamp();

        let mut cached = Vec::with_capacity(message.attachments.len());
        let mut copied = Vec::new();
        for attachment in &message.attachments {
            let already_durable = self.store.is_cached(attachment);

            match self.store.cache(attachment, seed).await {
                Ok(durable) => {
                    if !already_durable {
                        copied.push(durable.clone());
                    }
                    cached.push(durable);
                }
                Err(err) => {
                    // only files this call created are rolled back
                    for durable in &copied {
                        if let Err(release_err) = self.store.release(durable).await {
                            tracing::warn!(
                                name = %durable.name,
                                %release_err,
                                "could not roll back cached attachment"
                            );
                        }
                    }

                    return Err(err);
                }
            }
        }

        let message = NewMessage {
            attachments: cached,
            ..message
        };

        let mut tx = self.db.begin().await?;
        let id = QueuedMessage::insert(tx.acquire().await?, &message, queued_at).await?;
        tx.commit().await?;

        tracing::debug!(id, priority = message.priority, "message queued");

        let fast_lane =
            message.priority == PRIORITY_IMMEDIATE || self.config.send_immediately;

        let delivered = if fast_lane {
            Some(self.worker.send_one(id).await?)
        } else {
            None
        };

        Ok(SendReceipt { id, delivered })
    }

    /// Claims the next batch of sendable messages. Pass-through to the
    /// repository so callers stay independent of storage details.
    pub async fn next_batch(&self, limit: u32) -> Result<Vec<QueuedMessage>, Error> {
        let mut conn = self.db.acquire().await?;
        QueuedMessage::claim_batch(&mut *conn, limit).await
    }

    /// Runs the worker's drain loop. Returns the number of messages
    /// processed before the queue emptied or the deadline passed.
    pub async fn drain_queue(&self, deadline: Instant, batch_size: u32) -> Result<u64, Error> {
        self.worker.drain_queue(deadline, batch_size).await
    }

    pub async fn pending_count(&self, has_errors: bool) -> Result<u64, Error> {
        let mut conn = self.db.acquire().await?;
        QueuedMessage::count(&mut *conn, has_errors).await
    }

    pub async fn list_messages(
        &self,
        has_errors: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueuedMessage>, Error> {
        let mut conn = self.db.acquire().await?;
        QueuedMessage::list(&mut *conn, has_errors, limit, offset).await
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &AttachmentStore {
        &self.store
    }

    pub fn worker(&self) -> &DeliveryWorker {
        &self.worker
    }

    async fn materialize(&self, mut message: NewMessage) -> Result<NewMessage, Error> {
        if !message.needs_render() {
            return Ok(message);
        }

        // needs_render is only true with a template id present
        let template_id = message.template_id.unwrap_or_default();

        let Some(renderer) = &self.renderer else {
            return Err(Error::render(
                "message references a template but no renderer is configured",
            ));
        };

        let data = message
            .template_data
            .take()
            .unwrap_or(serde_json::Value::Null);

        let rendered = renderer
            .render(template_id, data, message.language_id)
            .await?;

        if let Some(subject) = rendered.subject {
            message.subject = subject;
        }
        message.body_html = rendered.body_html;
        message.body_text = rendered.body_text;
        message.attachments.extend(rendered.attachments);

        Ok(message)
    }
}
