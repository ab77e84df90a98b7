//! # esgate - Tier-Gated Search CLI
//!
//! The main binary for the esgate query translation layer.
//!
//! This application provides:
//! - TOML configuration loading
//! - CLI commands for queries, exports and aggregations
//! - Exit codes that follow the error kind
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      apps/esgate (THE BINARY)                   │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐     │
//! │  │   CLI       │    │   Config    │    │  Output          │     │
//! │  │  (clap)     │    │   (toml)    │    │  (JSON / NDJSON) │     │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘     │
//! │         │                  │                    │               │
//! │         └──────────────────┼────────────────────┘               │
//! │                            ▼                                    │
//! │                    ┌───────────────┐                            │
//! │                    │  esgate-core  │                            │
//! │                    │ (THE LOGIC)   │                            │
//! │                    └───────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! esgate check
//! esgate query -t subject -f '{"EQ": {"field": "gender", "value": "female"}}' -n 20
//! esgate export -t subject --fields age,gender -O subjects.ndjson
//! esgate --threshold 50 histogram -t subject --field age --step 10
//! ```
//!
//! Exit codes: 2 invalid input, 3 not found, 4 engine failure,
//! 5 configuration, 6 raw data denied, 1 anything else.

mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Install the stderr subscriber. ESGATE_LOG_FORMAT=json enables
/// machine-parseable output; ESGATE_LOG (or RUST_LOG) sets the filter.
fn init_tracing(verbose: bool) {
    let log_format = std::env::var("ESGATE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if verbose {
        "esgate=debug,esgate_core=debug"
    } else {
        "esgate=info,esgate_core=info"
    };

    let filter = EnvFilter::try_from_env("ESGATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
