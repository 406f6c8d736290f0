//! Tillfleet Edge Pairing Server
//!
//! Runs next to the onsite POS backend and exposes the claim pairing
//! surface the cloud control plane talks to.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tillfleet_edge::pairing::{PairingManager, StoreHints};
use tillfleet_edge::routes::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "tillfleet-edge")]
#[command(version, about = "Tillfleet onsite pairing server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// Path to the pairing state file.
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Claim validity window in seconds. Short on purpose: it bounds the
    /// exposure of a leaked code.
    #[arg(long, default_value_t = 600)]
    claim_ttl: i64,

    /// Store name hint reported to the cloud during confirmation.
    #[arg(long, env = "TILLFLEET_STORE_NAME")]
    store_name: Option<String>,

    /// Store code hint reported to the cloud during confirmation.
    #[arg(long, env = "TILLFLEET_STORE_CODE")]
    store_code: Option<String>,

    /// Timezone hint reported to the cloud during confirmation.
    #[arg(long, env = "TILLFLEET_TIMEZONE")]
    timezone: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tillfleet_edge=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting tillfleet-edge"
    );

    let state_path = match args.state_path {
        Some(path) => Some(path),
        None => Some(default_state_path()?),
    };

    let pairing = PairingManager::open(
        state_path,
        args.claim_ttl,
        StoreHints {
            store_name: args.store_name,
            store_code: args.store_code,
            timezone: args.timezone,
        },
        env!("CARGO_PKG_VERSION"),
    )
    .map_err(|e| anyhow::anyhow!("failed to open pairing state: {e}"))?;

    let app = build_router(AppState {
        pairing: Arc::new(pairing),
    });

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Pairing surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Edge pairing server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}

fn default_state_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".tillfleet").join("pairing.json"))
}
