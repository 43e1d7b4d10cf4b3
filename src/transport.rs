//! Transport boundary.
//!
//! The queue does not speak SMTP itself; a [`Transport`] either delivers a
//! fully materialized message or reports a human-readable failure that ends
//! up in the row's `last_error`. Concrete SMTP/sendmail/OAuth transports are
//! provided by the embedding application.

use async_trait::async_trait;
use snafu::Snafu;

use crate::message::QueuedMessage;

#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &QueuedMessage) -> Result<(), TransportError>;
}

/// Development transport used by the drain daemon: logs the envelope and
/// reports success.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl Transport for LoggingTransport {
    async fn send(&self, message: &QueuedMessage) -> Result<(), TransportError> {
        let recipients: Vec<String> = message
            .to
            .iter()
            .map(|m| m.address.to_string())
            .collect();

        tracing::info!(
            id = message.id,
            from = %message.from.address,
            to = ?recipients,
            subject = %message.subject,
            "delivering message via logging transport"
        );

        Ok(())
    }
}
