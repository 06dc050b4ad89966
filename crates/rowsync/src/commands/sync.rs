use std::time::Duration;

use librowsync_core::types::ids::{id_to_hex, short_hex};
use librowsync_core::RowsyncError;
use librowsync_session::{CancelFlag, SyncConfig, SyncCoordinator, SyncResult};
use librowsync_wire::TcpTransport;
use serde::Serialize;
use tracing::info;

use crate::cli::Cli;
use crate::context::{ResolvedPeer, RowsyncContext};
use crate::error::CliError;
use crate::output::output_success;

#[derive(Serialize)]
struct SyncOutput {
    session_id: String,
    peer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer_name: Option<String>,
    applied: usize,
    conflicts: usize,
    skipped: usize,
    sent: usize,
    rounds: u32,
    peer_acknowledged: bool,
}

pub fn run(cli: &Cli, peer: &str, address: Option<String>, timeout_ms: Option<u64>) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let peer = ctx.resolve_peer(peer)?;
    let address = address.or_else(|| peer.address.clone()).ok_or_else(|| {
        RowsyncError::InvalidArgs(format!(
            "no address known for peer {}; pass --address or register it with 'rowsync peer add'",
            short_hex(&peer.peer_id)
        ))
    })?;

    let mut config = SyncConfig::from_replica_config(&ctx.config)?;
    if let Some(ms) = timeout_ms {
        config.transport_timeout = Duration::from_millis(ms);
    }

    let store = ctx.open_store()?;
    let coordinator = SyncCoordinator::new(store.shared(), config);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = runtime.block_on(sync_with(&coordinator, &peer, &address))?;
    store.flush()?;

    output_success(
        cli,
        SyncOutput {
            session_id: result.session_id,
            peer_id: id_to_hex(&result.peer_id),
            peer_name: peer.name,
            applied: result.applied_count,
            conflicts: result.conflict_count,
            skipped: result.skipped_count,
            sent: result.sent_count,
            rounds: result.rounds,
            peer_acknowledged: result.peer_acknowledged,
        },
        |o| {
            println!(
                "Synced with {}: received {} change(s), sent {}, {} conflict(s)",
                o.peer_name.as_deref().unwrap_or(&o.peer_id[..8]),
                o.applied,
                o.sent,
                o.conflicts
            );
            if !o.peer_acknowledged {
                println!("Peer did not confirm; sent changes will be offered again next time");
            }
        },
    );
    Ok(())
}

async fn sync_with(coordinator: &SyncCoordinator, peer: &ResolvedPeer, address: &str) -> Result<SyncResult, CliError> {
    let timeout = coordinator.config().transport_timeout;
    let transport = TcpTransport::connect(address, peer.peer_id, timeout).await?;
    info!(address, "connected");

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    Ok(coordinator.start_sync(peer.peer_id, &transport, &cancel).await?)
}
