//! escape-cal - escape-time iteration server.
//!
//! Speaks the `CAL`/`EXIT` line protocol on stdin/stdout. Diagnostics go to
//! stderr so they never interleave with replies.

use anyhow::{Context, Result};
use tokio::io::{stdin, stdout, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escape_cal::config::Config;
use escape_cal::protocol::serve;

fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| config.log_filter_or("escape_cal=info").to_string()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    tracing::info!("Starting escape-cal v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        max_precision = config.max_precision,
        max_iterations = ?config.max_iterations,
        "Request limits"
    );

    // Requests are handled strictly one at a time.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(serve(BufReader::new(stdin()), stdout(), &config));

    match result {
        Ok(summary) => {
            tracing::info!(
                shutdown = ?summary.shutdown,
                calculated = summary.calculated,
                rejected = summary.rejected,
                "escape-cal exited cleanly"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Session error: {:#}", e);
            Err(e)
        }
    }
}
