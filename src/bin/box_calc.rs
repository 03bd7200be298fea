//! box-calc - escape-time survey of a box of `c` values.
//!
//! ```text
//! box-calc <min_ca> <min_cb> <max_ca> <max_cb> <resolution> \
//!          <start_max_iterations> <escape_radius> <output_path>
//! ```
//!
//! Bounds and radius are base-32. Work is spread over one `escape-cal`
//! process per CPU; the server is `$ESCAPE_CAL_SERVER`, else the
//! `escape-cal` binary next to this one. Results go to `output_path` as CSV.

use std::fs::File;
use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escape_cal::box_calc::{survey, BoxRun, BoxSpec, WorkerPool, MAX_TOTAL_ITERATIONS};

/// Environment variable naming the server executable.
const SERVER_ENV: &str = "ESCAPE_CAL_SERVER";

/// Per-request timeout. Late rounds run millions of iterations per point.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60);

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} <min_ca> <min_cb> <max_ca> <max_cb> <resolution> \
         <start_max_iterations> <escape_radius> <output_path>",
        program
    );
}

fn parse_args(args: &[String]) -> Option<(BoxSpec, PathBuf)> {
    let [min_ca, min_cb, max_ca, max_cb, resolution, start, radius, output] = args else {
        return None;
    };

    let spec = BoxSpec {
        min_ca: min_ca.clone(),
        min_cb: min_cb.clone(),
        max_ca: max_ca.clone(),
        max_cb: max_cb.clone(),
        resolution: resolution.parse().ok()?,
        start_max_iterations: start.parse().ok()?,
        escape_radius: radius.clone(),
        max_total_iterations: MAX_TOTAL_ITERATIONS,
    };
    Some((spec, PathBuf::from(output)))
}

/// Resolve the server executable.
fn server_program() -> Result<PathBuf> {
    let program = match std::env::var_os(SERVER_ENV) {
        Some(explicit) => PathBuf::from(explicit),
        None => std::env::current_exe()
            .context("Failed to locate box-calc executable")?
            .with_file_name(format!("escape-cal{}", std::env::consts::EXE_SUFFIX)),
    };

    if !program.exists() {
        bail!("escape-cal executable not found at {}", program.display());
    }
    Ok(program)
}

async fn run(spec: BoxSpec, output: PathBuf) -> Result<()> {
    let mut run = BoxRun::new(&spec).context("Invalid box")?;
    let server = server_program()?;

    let workers = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    tracing::info!(workers, server = %server.display(), "Starting worker processes");

    let mut pool = WorkerPool::spawn(&server, workers, REQUEST_TIMEOUT)
        .await
        .with_context(|| format!("Failed to start {}", server.display()))?;

    survey(&mut run, &mut pool).await.context("Survey failed")?;
    pool.shutdown().await.context("Failed to stop workers")?;

    tracing::info!(path = %output.display(), "Writing results");
    let file = File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    run.write_csv(BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!("Calculation complete");
    Ok(())
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "escape_cal=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut args = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let program = args.next().unwrap_or_else(|| "box-calc".to_string());
    let args: Vec<String> = args.collect();

    let Some((spec, output)) = parse_args(&args) else {
        print_usage(&program);
        return Ok(ExitCode::FAILURE);
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(run(spec, output))?;

    Ok(ExitCode::SUCCESS)
}
