//! Geo Indexer Main Entry Point
//!
//! Runs every configured job once and exits: non-zero on a fatal error.

use dotenv::dotenv;
use geo_indexer::{Dependencies, IndexingError};
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("geo_indexer=info,geo_indexer_repository=info"));

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "geo-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "geo-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    info!("Starting Geo Indexer");

    let mut deps = match Dependencies::new().await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let recovery_file = deps.orchestrator.queue().recorder().path().to_path_buf();
    match deps.orchestrator.run().await {
        Ok(summary) => {
            if summary.failed > 0 {
                warn!(
                    failed = summary.failed,
                    recovery_file = %recovery_file.display(),
                    "Some documents were rejected; replay them with a recovery job"
                );
            }
            info!("Geo indexer completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Geo indexer failed");
            Err(e.into())
        }
    }
}
