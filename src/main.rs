//! CLI entry point for the solar SCADA filtering tool.
//!
//! Provides subcommands for running the full filtering pipeline over a raw
//! SCADA export, checking an export against the site configuration, and
//! printing the effective configuration.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pv_scada_filter::config::SiteConfig;
use pv_scada_filter::loader::{LoaderOptions, load_samples};
use pv_scada_filter::output::{ExportOptions, export_all, print_json, print_pretty};
use pv_scada_filter::pipeline::run_pipeline;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "pv_scada_filter")]
#[command(about = "Data-quality filtering for solar farm SCADA telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a raw 3-second export and write 1-minute and 15-minute results
    Run {
        /// Raw SCADA CSV export
        #[arg(short, long, value_name = "CSV")]
        input: PathBuf,

        /// Site configuration JSON (falls back to SITE_CONFIG, then built-in defaults)
        #[arg(short, long)]
        config: Option<String>,

        /// Directory to write result CSVs into
        #[arg(short, long, default_value = "output_data")]
        output_dir: PathBuf,

        /// Lines of preamble before the header row
        #[arg(long, default_value_t = 5)]
        skip_rows: usize,

        /// Gzip compress the result CSVs
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Log the run summary as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load an export and check it against the site configuration
    Check {
        #[arg(short, long, value_name = "CSV")]
        input: PathBuf,

        #[arg(short, long)]
        config: Option<String>,

        #[arg(long, default_value_t = 5)]
        skip_rows: usize,
    },
    /// Print the effective site configuration as JSON
    ShowConfig {
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/pv_scada_filter.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("pv_scada_filter.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            config,
            output_dir,
            skip_rows,
            gzip,
            json,
        } => {
            let config = site_config(config)?;
            let stream = load_samples(&input, &LoaderOptions { skip_rows })
                .with_context(|| format!("failed to load {}", input.display()))?;

            let output = run_pipeline(stream, &config)?;

            let written = export_all(&output, &config, &ExportOptions { output_dir, gzip })?;
            info!(files = written.len(), "Export complete");

            if json {
                print_json(&output.summary)?;
            } else {
                print_pretty(&output.summary);
            }
        }
        Commands::Check {
            input,
            config,
            skip_rows,
        } => {
            let config = site_config(config)?;
            let stream = load_samples(&input, &LoaderOptions { skip_rows })
                .with_context(|| format!("failed to load {}", input.display()))?;
            config.verify_columns(stream.columns())?;

            let first = stream.samples().first().map(|s| s.timestamp);
            let last = stream.samples().last().map(|s| s.timestamp);
            info!(
                rows = stream.len(),
                columns = stream.columns().len(),
                first = ?first,
                last = ?last,
                "Input matches site configuration"
            );
        }
        Commands::ShowConfig { config } => {
            let config = site_config(config)?;
            info!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Resolves the site configuration from the flag, the `SITE_CONFIG` env var,
/// or the built-in defaults.
#[tracing::instrument]
fn site_config(path: Option<String>) -> Result<SiteConfig> {
    match path.or_else(|| std::env::var("SITE_CONFIG").ok()) {
        Some(path) => {
            info!(path = %path, "Loading site configuration");
            SiteConfig::load(&path)
        }
        None => {
            info!("No site configuration given, using built-in defaults");
            Ok(SiteConfig::default())
        }
    }
}
