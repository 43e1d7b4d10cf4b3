//! Validation boundary.

use std::fmt;

use crate::message::NewMessage;

/// Reason a message was refused at the queue door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

pub trait Validator: Send + Sync {
    fn validate(&self, message: &NewMessage) -> Result<(), Rejection>;
}

/// Default validator: a sendable message has at least one recipient and at
/// least one non-empty body.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardValidator;

impl Validator for StandardValidator {
    fn validate(&self, message: &NewMessage) -> Result<(), Rejection> {
        if message.to.is_empty() && message.bcc.is_empty() {
            return Err(Rejection::new("message has no recipients"));
        }

        if message.body_html.is_empty() && message.body_text.is_empty() {
            return Err(Rejection::new("message has no body"));
        }

        Ok(())
    }
}
