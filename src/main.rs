//! globe-news-ingest: one ingest run over the configured RSS and news-API sources.
//! Prints the run report as JSON on stdout; exits non-zero if the run aborted.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use globe_news_ingest::metrics::Metrics;
use globe_news_ingest::{registry_from_config, JsonlStore, Pipeline, PipelineConfig, RunStatus};

/// `RUST_LOG` filter (default `info`), JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

async fn run() -> anyhow::Result<RunStatus> {
    let cfg = PipelineConfig::load_default().context("loading ingest config")?;
    let metrics = Metrics::init(cfg.max_concurrency)?;

    let registry = registry_from_config(&cfg).context("building source registry")?;
    if registry.is_empty() {
        tracing::warn!(target: "ingest", "no sources configured");
    }

    let store = JsonlStore::open(&cfg.store_dir)
        .await
        .with_context(|| format!("opening store at {}", cfg.store_dir.display()))?;
    let pipeline = Pipeline::new(registry, Arc::new(store), cfg.settings());

    let report = pipeline.run_once().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing run report")?
    );

    if let Some(path) = &cfg.metrics_textfile {
        if let Err(e) = metrics.write_textfile(path) {
            tracing::warn!(error = ?e, path = %path.display(), "metrics textfile not written");
        }
    }

    Ok(report.status)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(RunStatus::Aborted) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "ingest run failed");
            ExitCode::from(2)
        }
    }
}
