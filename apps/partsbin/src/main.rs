//! # partsbin - Inventory Catalog Server
//!
//! The main binary for the partsbin catalog.
//!
//! This application provides:
//! - HTTP JSON API server (axum-based)
//! - CLI interface for catalog inspection
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           apps/partsbin (THE BINARY)         │
//! │                                              │
//! │  ┌─────────────┐        ┌─────────────┐      │
//! │  │    CLI      │        │  HTTP API   │      │
//! │  │  (clap)     │        │   (axum)    │      │
//! │  └──────┬──────┘        └──────┬──────┘      │
//! │         └───────────┬──────────┘             │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │ partsbin-core │                │
//! │             │  (THE STORE)  │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! partsbin server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! partsbin status
//! partsbin query 'resistance>=1000 & package=SMD'
//! partsbin tree category --depth 3
//! ```

use clap::Parser;
use partsbin::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // PARTSBIN_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("PARTSBIN_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "partsbin=info,partsbin_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the partsbin startup banner.
fn print_banner() {
    println!(
        r#"
  ┌─┐┌─┐┬─┐┌┬┐┌─┐┌┐ ┬┌┐┌
  ├─┘├─┤├┬┘ │ └─┐├┴┐││││
  ┴  ┴ ┴┴└─ ┴ └─┘└─┘┴┘└┘

  Inventory Catalog v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
