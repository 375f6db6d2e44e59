// src/ingest/mod.rs
pub mod builder;
pub mod canonical;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod lang;
pub mod pipeline;
pub mod pool;
pub mod providers;
pub mod registry;
pub mod report;
pub mod sanitize;
pub mod state;
pub mod task;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use builder::{ArticleBuilder, BuildOutcome, BuilderConfig};
pub use gateway::{GatewayConfig, PersistenceGateway, StoreOutcome};
pub use pipeline::{Pipeline, PipelineSettings};
pub use pool::{PoolConfig, RetryPolicy, WorkerPool};
pub use registry::SourceRegistry;
pub use report::{RunReport, RunStatus, SourceStats};
pub use types::{Article, CandidateLocator, NewsSource, RawContent, RejectReason, RejectedItem, Source};

/// One-time metrics registration (so series show up in the exposition).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_discovered_total", "Locators returned by source discovery.");
        describe_counter!(
            "ingest_discovery_errors_total",
            "Discovery failures or timeouts, per source."
        );
        describe_counter!("ingest_stored_total", "Articles newly written to the store.");
        describe_counter!(
            "ingest_already_stored_total",
            "Articles whose fingerprint was already stored."
        );
        describe_counter!("ingest_rejected_total", "Rejected locators, by reason.");
        describe_counter!("ingest_fetch_attempts_total", "Fetch attempts, retries included.");
        describe_counter!(
            "ingest_fetch_requests_total",
            "HTTP requests by method (basic, fallback, api) and response status."
        );
        describe_counter!(
            "ingest_builds_total",
            "Article builds by provider host and outcome (valid, rejected)."
        );
        describe_counter!(
            "ingest_storage_retries_total",
            "Store writes retried after a transient failure."
        );
        describe_counter!("ingest_runs_total", "Completed calls to run_once.");
        describe_histogram!("ingest_fetch_ms", "Single fetch attempt time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("ingest_in_flight", "Fetch tasks currently holding a permit.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}
