//! Template rendering boundary.
//!
//! Messages queued from a template id are rendered before they are validated
//! and persisted; the data payload handed to the renderer is not stored.

use async_trait::async_trait;
use snafu::Snafu;

use crate::{error::Error, message::Attachment};

#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct RenderError {
    pub message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        Error::render(err.message)
    }
}

/// Output of a template render. `subject` overrides the message subject when
/// present; rendered attachments (generated reports and the like) join the
/// message's own attachments.
#[derive(Debug, Default)]
pub struct Rendered {
    pub subject: Option<String>,
    pub body_html: String,
    pub body_text: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        template_id: i64,
        data: serde_json::Value,
        language_id: Option<i64>,
    ) -> Result<Rendered, RenderError>;
}
