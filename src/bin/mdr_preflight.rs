//! MDR preflight CLI
//!
//! Checks that the repository API is reachable and that the mandatory CT
//! packages are installed, before any import is started.
//!
//! Usage:
//!   MDR_API_BASE_URL=http://localhost:5003/api \
//!     cargo run --features cli --bin mdr_preflight
//!
//!   # Config from YAML, skipping the package check
//!   cargo run --features cli --bin mdr_preflight -- \
//!     --config config/mdr.yaml \
//!     --schema-migration

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use mdr_api_bindings::{ApiBinding, BindingConfig, StartupContext};

/// Preflight check for the MDR API
#[derive(Parser, Debug)]
#[command(name = "mdr_preflight")]
#[command(about = "Verify the MDR API is reachable and CT packages are installed")]
struct Args {
    /// YAML config file (default: read MDR_* environment variables)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Running from a schema migration; skip the CT package check
    #[arg(long)]
    schema_migration: bool,

    /// Print the installed package names
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BindingConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BindingConfig::from_env().context("loading config from environment")?,
    };
    let context = if args.schema_migration {
        StartupContext::SchemaMigration
    } else {
        StartupContext::Import
    };

    let report = match ApiBinding::connect_http(config, None, context) {
        Ok((_, report)) => report,
        Err(e) => {
            eprintln!("Preflight failed: {}", e);
            std::process::exit(1);
        }
    };

    if !report.checked {
        println!("API reachable; CT package check skipped");
        return Ok(());
    }

    println!("API reachable; {} CT packages installed", report.installed.len());
    if args.verbose {
        for name in &report.installed {
            println!("  {}", name);
        }
    }
    if !report.missing_optional.is_empty() {
        println!("Missing optional: {}", report.missing_optional.join(", "));
    }
    Ok(())
}
