//! ERP Bridge MCP Server - entry point
//!
//! Standalone server binary for Claude Desktop configs. The ERP is picked
//! with ERPBRIDGE_ERP (omie/nibo), the store directory with ERPBRIDGE_DIR,
//! and the master passphrase with ERPBRIDGE_MASTER_PASSWORD.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bridge_core::{default_store_dir, master_passphrase_from_env};
use bridge_mcp::{adapter_for, create_shared_state, run_server, ErpAdapter};

/// Initialize logging to stderr (stdout is used for the MCP protocol)
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let erp = std::env::var("ERPBRIDGE_ERP").unwrap_or_else(|_| "omie".to_string());
    let store_dir = default_store_dir();

    info!(%erp, store = %store_dir.display(), "ERP bridge MCP server starting");

    let adapter: Arc<dyn ErpAdapter> = match adapter_for(&erp) {
        Ok(a) => Arc::from(a),
        Err(e) => {
            error!("failed to select adapter: {e}");
            return Err(e.into());
        }
    };

    let passphrase = master_passphrase_from_env();
    let state = match create_shared_state(store_dir, adapter, &passphrase).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to open credential store: {e}");
            return Err(e.into());
        }
    };

    run_server(state).await?;

    info!("ERP bridge MCP server shutting down");
    Ok(())
}
