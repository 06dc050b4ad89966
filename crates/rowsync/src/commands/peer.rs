use librowsync_core::types::ids::{id_to_hex, parse_origin_id};
use librowsync_core::{PeerConfig, RowsyncError};
use serde::Serialize;

use crate::cli::{Cli, PeerCommand};
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::{output_success, print_table};

#[derive(Serialize)]
struct PeerEntry {
    name: String,
    peer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
}

pub fn run(cli: &Cli, cmd: PeerCommand) -> Result<(), CliError> {
    match cmd {
        PeerCommand::Add { name, peer_id, address } => run_add(cli, name, peer_id, address),
        PeerCommand::List => run_list(cli),
        PeerCommand::Remove { name } => run_remove(cli, name),
    }
}

fn run_add(cli: &Cli, name: String, peer_id: String, address: Option<String>) -> Result<(), CliError> {
    let mut ctx = RowsyncContext::resolve(cli)?;
    let id = parse_origin_id(&peer_id).map_err(RowsyncError::from)?;
    if id == ctx.replica_id()? {
        return Err(RowsyncError::InvalidArgs("a replica cannot peer with itself".to_string()).into());
    }
    if ctx.config.peers.contains_key(&name) {
        return Err(RowsyncError::InvalidArgs(format!("peer '{}' already exists", name)).into());
    }

    let peer_id = id_to_hex(&id);
    ctx.config.peers.insert(
        name.clone(),
        PeerConfig {
            peer_id: peer_id.clone(),
            address: address.clone(),
        },
    );
    ctx.save()?;

    output_success(cli, PeerEntry { name, peer_id, address }, |p| {
        println!("Added peer {} ({})", p.name, p.peer_id);
    });
    Ok(())
}

fn run_list(cli: &Cli) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let peers: Vec<PeerEntry> = ctx
        .config
        .peers
        .iter()
        .map(|(name, p)| PeerEntry {
            name: name.clone(),
            peer_id: p.peer_id.clone(),
            address: p.address.clone(),
        })
        .collect();

    output_success(cli, peers, |peers| {
        if peers.is_empty() {
            println!("No peers configured");
            return;
        }
        let rows = peers
            .iter()
            .map(|p| vec![p.name.clone(), p.peer_id.clone(), p.address.clone().unwrap_or_default()])
            .collect();
        print_table(&["name", "replica id", "address"], rows);
    });
    Ok(())
}

fn run_remove(cli: &Cli, name: String) -> Result<(), CliError> {
    let mut ctx = RowsyncContext::resolve(cli)?;
    let removed = ctx
        .config
        .peers
        .remove(&name)
        .ok_or_else(|| RowsyncError::NotFound(format!("peer '{}'", name)))?;
    ctx.save()?;

    output_success(
        cli,
        PeerEntry {
            name,
            peer_id: removed.peer_id,
            address: removed.address,
        },
        |p| println!("Removed peer {}", p.name),
    );
    Ok(())
}
