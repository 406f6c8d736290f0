//! Tillfleet Control Plane Server
//!
//! Claims, health-monitors, and remotely commands onsite POS nodes on
//! behalf of a multi-tenant operator hierarchy.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tillfleet_control::auth::JwtManager;
use tillfleet_control::claim::{ClaimService, HttpOnsiteClient};
use tillfleet_control::server::{AppState, build_router};
use tillfleet_control::storage::ControlDatabase;
use tillfleet_core::health::HealthThresholds;

#[derive(Parser, Debug)]
#[command(name = "tillfleet-control")]
#[command(version, about = "Tillfleet control plane - claim pairing and fleet commands")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8700")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JWT secret key.
    #[arg(
        long,
        env = "TILLFLEET_JWT_SECRET",
        default_value = "dev-secret-change-me"
    )]
    jwt_secret: String,

    /// Operator access token TTL in seconds.
    #[arg(long, default_value_t = 3600)]
    access_ttl: i64,

    /// Impersonation link TTL in seconds.
    #[arg(long, default_value_t = 300)]
    impersonation_ttl: i64,

    /// Heartbeat gap (seconds) below which a node reads ONLINE.
    #[arg(long, default_value_t = 120)]
    online_within: i64,

    /// Heartbeat gap (seconds) below which a node reads STALE rather
    /// than OFFLINE.
    #[arg(long, default_value_t = 1800)]
    stale_within: i64,

    /// Timeout (seconds) for confirm/finalize calls to onsite servers.
    #[arg(long, default_value_t = 10)]
    onsite_timeout: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tillfleet_control=info".into()),
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
        "Starting tillfleet-control"
    );

    let db = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening control database");
            ControlDatabase::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening control database (default path)");
            ControlDatabase::open(&default_path).await?
        }
    };

    let jwt = Arc::new(JwtManager::new(
        args.jwt_secret.as_bytes(),
        args.access_ttl,
        args.impersonation_ttl,
    ));

    let onsite = Arc::new(HttpOnsiteClient::new(Duration::from_secs(
        args.onsite_timeout,
    ))?);
    let claims = Arc::new(ClaimService::new(db.clone(), onsite));

    let state = AppState {
        db,
        jwt,
        thresholds: HealthThresholds {
            online_within_secs: args.online_within,
            stale_within_secs: args.stale_within,
        },
        claims,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".tillfleet").join("control.db"))
}
