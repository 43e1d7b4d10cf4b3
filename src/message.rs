//! Queued message model and its row-level operations.
//!
//! A message enters the queue as a [`NewMessage`], becomes a [`QueuedMessage`]
//! once the repository has assigned it an id, and leaves the table either on
//! confirmed delivery (row deleted) or by exhausting its retry budget, after
//! which it sits as a dead letter until an operator sets `force_resend`.
//!
//! # Claiming
//!
//! Workers take ownership of rows through [`QueuedMessage::claim_batch`] and
//! [`QueuedMessage::claim_one`]. Both select and mark eligible rows in a
//! single `UPDATE ... RETURNING` statement, so two workers draining the same
//! database can never claim the same row twice. Claiming increments
//! `send_count` and clears `force_resend`; a failed attempt increments
//! `error_count` and releases the claim.

use std::path::PathBuf;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_email::Email;
use sqlx::{prelude::FromRow, SqliteConnection};

use crate::error::Error;

/// Retry ceiling: a row with `send_count` or `error_count` at or above this
/// is no longer claimable unless `force_resend` is set.
pub const MAX_ATTEMPTS: i64 = 3;

/// Priority value that routes a message through the fast lane.
pub const PRIORITY_IMMEDIATE: i64 = 0;

/// Default priority for messages that can wait for the periodic drain.
pub const PRIORITY_DEFAULT: i64 = 10;

/// An address with an optional display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mailbox {
    pub address: Email,
    #[serde(default)]
    pub name: String,
}

impl Mailbox {
    pub fn new(address: Email) -> Self {
        Self {
            address,
            name: String::new(),
        }
    }

    pub fn named(address: Email, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }
}

/// Attachment metadata. The payload lives on disk at
/// `storage_dir/storage_file`; document and generated-report attachments are
/// tracked identically and share the same lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub storage_dir: PathBuf,
    pub storage_file: String,
    #[serde(default)]
    pub encoding: String,
}

impl Attachment {
    pub fn path(&self) -> PathBuf {
        self.storage_dir.join(&self.storage_file)
    }
}

/// A fully-rendered message that has not been persisted yet.
#[derive(Debug, Clone, Builder)]
pub struct NewMessage {
    pub from: Mailbox,
    #[builder(default)]
    pub to: Vec<Mailbox>,
    pub reply_to: Option<Mailbox>,
    #[builder(default)]
    pub bcc: Vec<Email>,
    #[builder(into, default)]
    pub subject: String,
    #[builder(into, default)]
    pub body_html: String,
    #[builder(into, default)]
    pub body_text: String,
    #[builder(default)]
    pub attachments: Vec<Attachment>,
    pub language_id: Option<i64>,
    pub customer_group_id: Option<i64>,
    pub template_id: Option<i64>,
    #[builder(default = PRIORITY_DEFAULT)]
    pub priority: i64,
    /// Payload handed to the template renderer at enqueue time. Never
    /// persisted.
    pub template_data: Option<serde_json::Value>,
}

impl NewMessage {
    /// A message queued from a template id carries no inline bodies; they are
    /// rendered before validation.
    pub(crate) fn needs_render(&self) -> bool {
        self.template_id.is_some() && self.body_html.is_empty() && self.body_text.is_empty()
    }
}

/// A persisted queue row.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    pub id: i64,
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    pub reply_to: Option<Mailbox>,
    pub bcc: Vec<Email>,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub attachments: Vec<Attachment>,
    pub language_id: Option<i64>,
    pub customer_group_id: Option<i64>,
    pub template_id: Option<i64>,
    pub priority: i64,
    pub send_count: i64,
    pub error_count: i64,
    pub is_sending: bool,
    pub force_resend: bool,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

/// Flat database row. Recipient, bcc and attachment lists are stored as JSON
/// text columns; the conversion to [`QueuedMessage`] is an explicit
/// field-by-field mapping.
#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub from_address: String,
    pub from_name: String,
    pub reply_to_address: Option<String>,
    pub reply_to_name: Option<String>,
    pub recipients: String,
    pub bcc: String,
    pub attachments: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub language_id: Option<i64>,
    pub customer_group_id: Option<i64>,
    pub template_id: Option<i64>,
    pub priority: i64,
    pub send_count: i64,
    pub error_count: i64,
    pub is_sending: bool,
    pub force_resend: bool,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for QueuedMessage {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self, Error> {
        let from = Mailbox {
            address: Email::from_str(&row.from_address)
                .map_err(|_| Error::invalid_address(&row.from_address))?,
            name: row.from_name,
        };

        let reply_to = match row.reply_to_address {
            Some(address) => Some(Mailbox {
                address: Email::from_str(&address)
                    .map_err(|_| Error::invalid_address(&address))?,
                name: row.reply_to_name.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Self {
            id: row.id,
            from,
            to: serde_json::from_str(&row.recipients)?,
            reply_to,
            bcc: serde_json::from_str(&row.bcc)?,
            subject: row.subject,
            body_html: row.body_html,
            body_text: row.body_text,
            attachments: serde_json::from_str(&row.attachments)?,
            language_id: row.language_id,
            customer_group_id: row.customer_group_id,
            template_id: row.template_id,
            priority: row.priority,
            send_count: row.send_count,
            error_count: row.error_count,
            is_sending: row.is_sending,
            force_resend: row.force_resend,
            last_error: row.last_error,
            queued_at: row.queued_at,
        })
    }
}

fn collect(rows: Vec<MessageRow>) -> Result<Vec<QueuedMessage>, Error> {
    rows.into_iter().map(QueuedMessage::try_from).collect()
}

impl QueuedMessage {
    /// Persists a new row and returns its id. Attachment metadata must
    /// already point at durable paths.
    pub async fn insert(
        db: &mut SqliteConnection,
        message: &NewMessage,
        queued_at: DateTime<Utc>,
    ) -> Result<i64, Error> {
        let id = sqlx::query_scalar(
            "INSERT INTO mail_queue (
                from_address, from_name, reply_to_address, reply_to_name,
                recipients, bcc, attachments,
                subject, body_html, body_text,
                language_id, customer_group_id, template_id,
                priority, queued_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id",
        )
        .bind(message.from.address.to_string())
        .bind(&message.from.name)
        .bind(message.reply_to.as_ref().map(|m| m.address.to_string()))
        .bind(message.reply_to.as_ref().map(|m| m.name.clone()))
        .bind(serde_json::to_string(&message.to)?)
        .bind(serde_json::to_string(&message.bcc)?)
        .bind(serde_json::to_string(&message.attachments)?)
        .bind(&message.subject)
        .bind(&message.body_html)
        .bind(&message.body_text)
        .bind(message.language_id)
        .bind(message.customer_group_id)
        .bind(message.template_id)
        .bind(message.priority)
        .bind(queued_at)
        .fetch_one(db)
        .await?;

        Ok(id)
    }

    /// Atomically claims up to `limit` eligible rows, ordered by
    /// `(priority, id)`. Claimed rows come back with `is_sending` set,
    /// `send_count` already incremented and `force_resend` cleared.
    pub async fn claim_batch(
        db: &mut SqliteConnection,
        limit: u32,
    ) -> Result<Vec<QueuedMessage>, Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "UPDATE mail_queue
             SET is_sending = 1, send_count = send_count + 1, force_resend = 0
             WHERE id IN (
                 SELECT id FROM mail_queue
                 WHERE (is_sending = 0 AND send_count < $1 AND error_count < $1)
                    OR force_resend = 1
                 ORDER BY priority ASC, id ASC
                 LIMIT $2
             )
             RETURNING *",
        )
        .bind(MAX_ATTEMPTS)
        .bind(limit)
        .fetch_all(db)
        .await?;

        let mut messages = collect(rows)?;
        // RETURNING does not guarantee an order
        messages.sort_by_key(|m| (m.priority, m.id));

        Ok(messages)
    }

    /// Single-row claim used by the fast lane. Returns `None` when the row is
    /// missing, already claimed, or has exhausted its retry budget without
    /// `force_resend`.
    pub async fn claim_one(
        db: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<QueuedMessage>, Error> {
        let row: Option<MessageRow> = sqlx::query_as(
            "UPDATE mail_queue
             SET is_sending = 1, send_count = send_count + 1, force_resend = 0
             WHERE id = $2
               AND ((is_sending = 0 AND send_count < $1 AND error_count < $1)
                    OR force_resend = 1)
             RETURNING *",
        )
        .bind(MAX_ATTEMPTS)
        .bind(id)
        .fetch_optional(db)
        .await?;

        row.map(QueuedMessage::try_from).transpose()
    }

    /// Records a failed attempt and releases the claim. The attachments stay
    /// in place for the next retry.
    pub async fn mark_failed(
        db: &mut SqliteConnection,
        id: i64,
        error_text: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            "UPDATE mail_queue
             SET is_sending = 0, error_count = error_count + 1, last_error = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(error_text)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Releases a claim without recording an attempt outcome. Used for rows
    /// a drain pass claimed but never got to attempt; `send_count` keeps the
    /// claim's increment since the counter never decreases.
    pub async fn unclaim(db: &mut SqliteConnection, id: i64) -> Result<(), Error> {
        sqlx::query("UPDATE mail_queue SET is_sending = 0 WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    /// Deletes the row after a confirmed delivery.
    pub async fn mark_succeeded(db: &mut SqliteConnection, id: i64) -> Result<(), Error> {
        sqlx::query("DELETE FROM mail_queue WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    pub async fn count(db: &mut SqliteConnection, has_errors: bool) -> Result<u64, Error> {
        let sql = if has_errors {
            "SELECT COUNT(*) FROM mail_queue WHERE error_count > 0"
        } else {
            "SELECT COUNT(*) FROM mail_queue WHERE error_count = 0"
        };

        let count: i64 = sqlx::query_scalar(sql).fetch_one(db).await?;

        Ok(count as u64)
    }

    pub async fn list(
        db: &mut SqliteConnection,
        has_errors: bool,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueuedMessage>, Error> {
        let sql = if has_errors {
            "SELECT * FROM mail_queue WHERE error_count > 0
             ORDER BY priority ASC, id ASC LIMIT $1 OFFSET $2"
        } else {
            "SELECT * FROM mail_queue WHERE error_count = 0
             ORDER BY priority ASC, id ASC LIMIT $1 OFFSET $2"
        };

        let rows: Vec<MessageRow> = sqlx::query_as(sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?;

        collect(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> MessageRow {
        MessageRow {
            id: 7,
            from_address: "noreply@example.com".to_owned(),
            from_name: "Shop".to_owned(),
            reply_to_address: Some("support@example.com".to_owned()),
            reply_to_name: Some("Support".to_owned()),
            recipients: r#"[{"address":"user@example.com","name":"User"}]"#.to_owned(),
            bcc: r#"["archive@example.com"]"#.to_owned(),
            attachments: r#"[{"name":"invoice.pdf","mime_type":"application/pdf","storage_dir":"/var/cache","storage_file":"123-abc-invoice.pdf","encoding":"base64"}]"#.to_owned(),
            subject: "Your order".to_owned(),
            body_html: "<p>hi</p>".to_owned(),
            body_text: "hi".to_owned(),
            language_id: Some(1),
            customer_group_id: None,
            template_id: Some(42),
            priority: 10,
            send_count: 2,
            error_count: 1,
            is_sending: false,
            force_resend: true,
            last_error: "connection refused".to_owned(),
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn row_maps_to_message() {
        let message = QueuedMessage::try_from(row()).unwrap();

        assert_eq!(message.id, 7);
        assert_eq!(message.from.address.to_string(), "noreply@example.com");
        assert_eq!(message.to.len(), 1);
        assert_eq!(message.to[0].name, "User");
        assert_eq!(message.bcc[0].to_string(), "archive@example.com");
        assert_eq!(message.attachments[0].storage_file, "123-abc-invoice.pdf");
        assert_eq!(
            message.attachments[0].path(),
            PathBuf::from("/var/cache/123-abc-invoice.pdf")
        );
        assert!(message.force_resend);
        assert_eq!(message.last_error, "connection refused");
    }

    #[test]
    fn invalid_stored_address_is_an_error() {
        let mut bad = row();
        bad.from_address = "not an address".to_owned();

        assert!(matches!(
            QueuedMessage::try_from(bad),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn template_message_without_bodies_needs_render() {
        let message = NewMessage::builder()
            .from(Mailbox::new(Email::from_str("a@example.com").unwrap()))
            .template_id(3)
            .build();

        assert!(message.needs_render());

        let inline = NewMessage::builder()
            .from(Mailbox::new(Email::from_str("a@example.com").unwrap()))
            .template_id(3)
            .body_text("already rendered")
            .build();

        assert!(!inline.needs_render());
    }
}
