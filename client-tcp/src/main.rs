use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::ExitCode;
use std::sync::Arc;

use client_tcp::{Report, RunReport, runner};
use shared::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> shared::Result<()> {
    let config = Arc::new(Config::from_env()?);

    // one worker per configured thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()?;

    let report = runtime.block_on(runner::run(Arc::clone(&config)))?;
    print_report(&config, &report)?;
    Ok(())
}

fn print_report(config: &Config, report: &RunReport) -> shared::Result<()> {
    if report.load_only {
        info!(
            records = report.loaded_records,
            "Load-only run finished, skipping measured phase"
        );
        return Ok(());
    }

    println!("{}", Report(&report.stats));

    if let (Some(path), Some(origin)) = (&config.save, report.stats.start) {
        let mut out = BufWriter::new(File::create(path)?);
        report.stats.write_samples(&mut out, origin)?;
        out.flush()?;
        info!(path = %path.display(), "Saved raw samples");
    }

    Ok(())
}
