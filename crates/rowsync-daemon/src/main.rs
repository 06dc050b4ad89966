//! rowsync daemon - serves sync sessions for one replica
//!
//! The daemon holds the replica's exclusive lock and answers sessions opened
//! by peers' `rowsync sync`. Each accepted connection runs as the responder.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use librowsync_core::config::{sled_path, DEFAULT_DATA_DIR};
use librowsync_core::{require_config, ReplicaStore};
use librowsync_session::{SyncConfig, SyncCoordinator};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rowsync_daemon::{DaemonError, SyncServer, DEFAULT_MAX_SESSIONS};

const DEFAULT_LISTEN: &str = "127.0.0.1:7420";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "rowsync-daemon", about = "rowsync sync daemon", version)]
struct Cli {
    /// Replica data directory (default: ./.rowsync or ROWSYNC_HOME)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address (default: the replica's configured address, else 127.0.0.1:7420)
    #[arg(long)]
    listen: Option<String>,

    /// PID file path
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("rowsync-daemon starting");

    if let Err(e) = run(&cli).await {
        error!("rowsync-daemon failed: {}", e);
        std::process::exit(1);
    }

    info!("rowsync-daemon stopped");
}

async fn run(cli: &Cli) -> Result<(), DaemonError> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
        match std::env::var("ROWSYNC_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(DEFAULT_DATA_DIR),
        }
    });
    let config = require_config(&data_dir)?;
    let replica_id = config.origin_id()?;

    let locked = ReplicaStore::open_locked_blocking(
        &sled_path(&data_dir),
        replica_id,
        config.resolution(),
        LOCK_TIMEOUT,
    )?;
    let coordinator = Arc::new(SyncCoordinator::new(
        locked.shared(),
        SyncConfig::from_replica_config(&config)?,
    ));

    let listen = cli
        .listen
        .clone()
        .or_else(|| config.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let server = SyncServer::bind(&listen, coordinator, cli.max_sessions).await?;
    let cancel = server.cancel_flag();

    if let Some(ref pid_file) = cli.pid_file {
        let pid = std::process::id();
        if let Err(e) = std::fs::write(pid_file, pid.to_string()) {
            error!("Failed to write PID file: {}", e);
        }
    }

    let shutdown = setup_signal_handlers();
    let result = tokio::select! {
        result = server.run() => result,
        _ = shutdown => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    // Sessions still exchanging deltas stop at their next step; a commit in
    // progress runs to completion.
    cancel.cancel();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    if let Some(ref pid_file) = cli.pid_file {
        let _ = std::fs::remove_file(pid_file);
    }
    locked.flush()?;
    result
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers() -> impl std::future::Future<Output = ()> {
    async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}
