use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use lg_core::Config;
use lg_infra::{init_telemetry, shutdown_telemetry};
use lg_services::ReportAggregator;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "lg-report")]
#[command(about = "Build the daily per-practice bulk upload reports")]
struct Args {
    /// Report day (YYYY-MM-DD, UTC). Defaults to today.
    #[arg(long, value_name = "DATE")]
    date: Option<NaiveDate>,

    /// Practice that gets a report even without uploads. Repeatable; adds to REPORT_ODS_CODES.
    #[arg(long = "ods", value_name = "ODS_CODE")]
    ods_codes: Vec<String>,

    /// Print presigned download links for the written artifacts
    #[arg(long)]
    presign: bool,

    /// Lifetime of presigned links in seconds
    #[arg(long, default_value_t = 3600)]
    expires_in: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_env()?;
    config.validate()?;
    init_telemetry("lg-report", config.log_json())?;

    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    tracing::info!(%date, "Building bulk upload reports");

    let storage = lg_storage::create_storage(&config)
        .await
        .context("Failed to initialize storage")?;
    let stores = lg_db::create_stores(&config).await?;
    let aggregator = ReportAggregator::from_config(stores.reports.clone(), storage, &config)
        .with_expected_codes(args.ods_codes);

    let artifacts = aggregator
        .persist(date)
        .await
        .context("Failed to write reports")?;
    for artifact in &artifacts {
        println!("{}\t{}", artifact.ods_code, artifact.key);
    }

    if args.presign {
        let links = aggregator
            .presign(
                &artifacts,
                Duration::from_secs(args.expires_in),
                stores.zip_traces.as_ref(),
            )
            .await
            .context("Failed to presign report links")?;
        for link in links {
            println!("{}", link);
        }
    }

    tracing::info!(artifacts = artifacts.len(), "Reports written");
    shutdown_telemetry().await;
    Ok(())
}
