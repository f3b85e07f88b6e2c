use anyhow::{Context, Result};
use clap::Parser;
use lg_core::Config;
use lg_infra::{init_telemetry, shutdown_telemetry};
use lg_worker::{BatchSummary, QueueConsumer, SqsSource};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lg-ingest")]
#[command(about = "Ingest Lloyd George bulk upload messages")]
struct Args {
    /// Process a single queue event read from this file instead of polling SQS
    #[arg(long, value_name = "PATH")]
    event_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_env()?;
    config.validate()?;
    init_telemetry("lg-ingest", config.log_json())?;

    tracing::info!(
        environment = config.environment(),
        storage_backend = ?config.storage_backend(),
        "Starting ingestion worker"
    );

    let storage = lg_storage::create_storage(&config)
        .await
        .context("Failed to initialize storage")?;
    let stores = lg_db::create_stores(&config).await?;
    let scanner = lg_cli::virus_scanner(&config);
    let demographics = lg_cli::demographics(&config)?;
    let processor = Arc::new(lg_cli::build_processor(
        &config,
        storage,
        &stores,
        scanner,
        demographics,
    ));

    match args.event_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read event file {}", path.display()))?;
            let summary = processor.process_event(&raw).await;
            print_summary(&summary)?;
        }
        None => {
            let source = SqsSource::from_config(&config).await?;
            let consumer = QueueConsumer::start(Arc::new(source), processor);

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
            consumer.shutdown().await;
        }
    }

    shutdown_telemetry().await;
    Ok(())
}

fn print_summary(summary: &BatchSummary) -> Result<()> {
    let rows: Vec<_> = summary.rows();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    if summary.dropped() > 0 || summary.unrecorded() > 0 {
        eprintln!(
            "{} message(s) dropped, {} row(s) not recorded",
            summary.dropped(),
            summary.unrecorded()
        );
    }
    Ok(())
}
