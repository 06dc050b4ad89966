use librowsync_core::export::CursorJson;
use librowsync_core::types::ids::{id_to_hex, short_hex};
use serde::Serialize;

use crate::cli::{Cli, CursorCommand};
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::{output_success, print_table};

pub fn run(cli: &Cli, cmd: CursorCommand) -> Result<(), CliError> {
    match cmd {
        CursorCommand::Show { peer } => run_show(cli, peer),
        CursorCommand::Reset { peer } => run_reset(cli, &peer),
    }
}

fn run_show(cli: &Cli, peer: Option<String>) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let cursors = match peer {
        Some(peer) => {
            let peer = ctx.resolve_peer(&peer)?;
            vec![store.load_cursor(&peer.peer_id)?]
        }
        None => store.cursors().list()?,
    };
    let cursors: Vec<CursorJson> = cursors.iter().map(CursorJson::from).collect();

    output_success(cli, cursors, |cursors| {
        if cursors.is_empty() {
            println!("No cursors stored");
            return;
        }
        let mut rows = Vec::new();
        for cursor in cursors {
            if cursor.acknowledged.is_empty() {
                rows.push(vec![cursor.peer_id[..8].to_string(), "-".to_string(), "0".to_string()]);
            }
            for (origin, clock) in &cursor.acknowledged {
                rows.push(vec![cursor.peer_id[..8].to_string(), origin[..8].to_string(), clock.to_string()]);
            }
        }
        print_table(&["peer", "origin", "acknowledged"], rows);
    });
    Ok(())
}

#[derive(Serialize)]
struct ResetOutput {
    peer_id: String,
    removed: bool,
}

fn run_reset(cli: &Cli, peer: &str) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let peer = ctx.resolve_peer(peer)?;
    let store = ctx.open_store()?;
    let removed = store.reset_cursor(&peer.peer_id)?;

    output_success(
        cli,
        ResetOutput {
            peer_id: id_to_hex(&peer.peer_id),
            removed,
        },
        |o| {
            if o.removed {
                println!("Reset cursor for {}; the next sync starts from scratch", short_hex(&peer.peer_id));
            } else {
                println!("No cursor stored for {}", &o.peer_id[..8]);
            }
        },
    );
    Ok(())
}
