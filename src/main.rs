use std::{sync::Arc, time::Duration};

use mailspool::{config::Config, service::Service, transport::LoggingTransport};
use tokio::time::{interval, Instant};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("MAILSPOOL_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;

    let batch_size = config.batch_size;
    let budget = Duration::from_secs(config.drain_budget_secs);
    let mut ticker = interval(Duration::from_secs(config.drain_interval_secs));

    let service = Service::connect_with()
        .config(config)
        .transport(Arc::new(LoggingTransport))
        .call()
        .await?;

    tracing::info!("mailspool drain daemon started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let deadline = Instant::now() + budget;

                match service.drain_queue(deadline, batch_size).await {
                    Ok(0) => {}
                    Ok(processed) => tracing::info!(processed, "drained queue"),
                    Err(err) => tracing::error!(%err, "drain pass failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
