//! Flash sale service.
//!
//! Seeds the reservation cache from durable stock and reconciles admitted
//! intents into orders until Ctrl+C or SIGTERM.

use flash_sale_server::{Application, Config, shutdown_signal};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flash_sale=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        workers = config.reconciliation.workers,
        "Configuration loaded"
    );

    let app = Application::build(&config).await?;
    app.run(shutdown_signal()).await;

    Ok(())
}
