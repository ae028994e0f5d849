//! # Speech Translate - Main Application Entry Point
//!
//! Command line client that streams WAV recordings to a speech translation
//! service over a WebSocket and writes back the translated audio and transcript.
//!
//! ## Application Architecture:
//! - **cli**: Command line arguments
//! - **config**: Settings file, environment and defaults
//! - **validate**: Option values and input/output paths
//! - **endpoint**: Connection URI for the service
//! - **audio**: WAV header parsing and chunk planning
//! - **session**: One WebSocket upload per file (state machine, pacing, frames)
//! - **output**: Writing the translated artifacts
//! - **driver**: Files processed one after another
//! - **error**: Error taxonomy and process exit statuses
//!
//! ## Exit Status:
//! The process exits with the status of the first failure (see
//! [`error::ExitCode`]), or 0 when every file was translated.

mod audio; // WAV parsing and chunk plans
mod cli; // Command line arguments
mod config; // Configuration management (config.rs)
mod driver; // Sequential processing of input files
mod endpoint; // Service URI
mod error; // Error handling types (error.rs)
mod output; // Artifact writing
mod session; // Upload sessions (session/ directory)
mod validate; // Option and path validation

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use driver::{RunReport, SequentialDriver};
use error::{AppResult, ExitCode};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads `.env`** so keys and overrides can live next to the recordings
/// 2. **Parses the command line**
/// 3. **Sets up logging** at the requested verbosity
/// 4. **Runs the translation** and exits with the matching status
#[tokio::main]
async fn main() {
    // .ok() means "ignore errors" - it's fine if there's no .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(ExitCode::InternalError.code());
    }

    let code = match run(cli).await {
        Ok(report) => {
            report.log_summary();
            report.exit_code()
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    };

    if code != ExitCode::Normal {
        error!("Exiting with status {}: {}", code.code(), code.description());
    }
    std::process::exit(code.code());
}

/// Load and check everything, then hand the files to the driver.
///
/// ## Error Handling:
/// Configuration and validation problems are returned before any file is
/// touched; per-file failures end up in the [`RunReport`].
async fn run(cli: Cli) -> AppResult<RunReport> {
    info!("Starting speechtranslate v{}", env!("CARGO_PKG_VERSION"));

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_settings_path()?,
    };
    let config = AppConfig::load(&settings_path, &cli.overrides())?;
    config.validate()?;

    validate::validate_language("--from", &cli.from)?;
    validate::validate_language("--to", &cli.to)?;
    for file in &cli.files {
        validate::validate_input_file(file)?;
    }
    let output_dir = config.output_dir()?;
    validate::validate_output_dir(&output_dir)?;

    let uri = endpoint::build_endpoint_uri(&config.api, &cli.from, &cli.to)?;
    info!(
        "Translating {} -> {}, writing to {}",
        cli.from,
        cli.to,
        output_dir.display()
    );

    let driver = SequentialDriver::new(config.session_settings(output_dir), uri, config.failure_policy());
    Ok(driver.run(&cli.files).await)
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Wins when set (e.g. "speechtranslate=trace,tungstenite=debug")
/// - Otherwise `-v` flags pick the level: none = info, `-v` = debug, `-vv` = trace
///
/// Logs go to stderr so stdout stays free for scripting.
fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warn,speechtranslate={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
