use anyhow::{anyhow, Context, Result};
use aws_lambda_events::event::s3::S3Event;
use lambda_runtime::{service_fn, LambdaEvent};
use reingest::{handle_event, Config, FirehoseSink, Reingestor, S3ObjectStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.log_level);

    info!(
        stream = %config.firehose_dest,
        max_reingest = config.max_reingest,
        failed_prefix = %config.s3_failed_prefix,
        "Starting Nier Reingest Service"
    );

    // Initialize components
    let store = Arc::new(S3ObjectStore::new(&config).await);
    let sink = Arc::new(FirehoseSink::new(&config).await);
    let reingestor = Arc::new(Reingestor::from_config(&config, store, sink));

    lambda_runtime::run(service_fn(move |event: LambdaEvent<S3Event>| {
        let reingestor = reingestor.clone();
        async move {
            handle_event(&reingestor, &event.payload)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
    .map_err(|e| anyhow!(e))
    .context("Lambda runtime exited with an error")?;

    info!("Reingest service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}
