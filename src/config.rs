use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Path to the queue database. `None` uses an in-memory database.
    pub db_path: Option<String>,
    /// Durable cache directory for attachment payloads.
    pub attachment_dir: Option<String>,
    /// When set, every accepted message is delivered synchronously,
    /// regardless of priority.
    #[serde(default)]
    pub send_immediately: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Upper bound, in seconds, for a single drain pass.
    #[serde(default = "default_drain_budget_secs")]
    pub drain_budget_secs: u64,
    /// How often the daemon starts a drain pass.
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
}

fn default_batch_size() -> u32 {
    20
}

fn default_drain_budget_secs() -> u64 {
    300
}

fn default_drain_interval_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("MAILSPOOL_").from_env::<Self>()?)
    }

    pub fn db_path(&self) -> Option<&str> {
        self.db_path.as_deref()
    }

    pub fn attachment_dir(&self) -> &str {
        self.attachment_dir.as_deref().unwrap_or("attachments")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            attachment_dir: None,
            send_immediately: false,
            batch_size: default_batch_size(),
            drain_budget_secs: default_drain_budget_secs(),
            drain_interval_secs: default_drain_interval_secs(),
        }
    }
}
