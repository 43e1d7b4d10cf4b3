use snafu::Snafu;

/// Errors surfaced by the queue subsystem.
///
/// `Rejected`, `AttachmentCache` and `Render` happen at acceptance time and
/// mean nothing durable was created. Everything else is infrastructure.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Message rejected: {reason}"))]
    Rejected { reason: String },

    #[snafu(display("Failed to cache attachment {name}"))]
    AttachmentCache {
        name: String,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Template rendering failed: {message}"))]
    Render { message: String },

    #[snafu(display("Invalid address in stored message: {address}"))]
    InvalidAddress { address: String },

    #[snafu(display("Error returned from database"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    Migration {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("Malformed stored message field"))]
    Json {
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Filesystem error"))]
    Io {
        #[snafu(source)]
        source: std::io::Error,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::Migration { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Json { source }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl Error {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    /// True for errors that reject an enqueue outright, as opposed to
    /// infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::AttachmentCache { .. } | Self::Render { .. }
        )
    }
}
