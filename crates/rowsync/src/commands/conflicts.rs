use librowsync_core::export::ConflictJson;
use serde::Serialize;

use crate::cli::Cli;
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::{output_success, print_table};

#[derive(Serialize)]
struct ConflictsOutput {
    conflicts: Vec<ConflictJson>,
}

pub fn run(cli: &Cli, table: Option<String>, key: Option<String>) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;

    let records = match (&table, &key) {
        (Some(table), Some(key)) => store.conflicts().for_row(table, key)?,
        (Some(table), None) => store
            .conflicts()
            .list()?
            .into_iter()
            .filter(|c| &c.table_name == table)
            .collect(),
        _ => store.conflicts().list()?,
    };
    let conflicts = records.iter().map(ConflictJson::from).collect();

    output_success(cli, ConflictsOutput { conflicts }, |o| {
        if o.conflicts.is_empty() {
            println!("No conflicts recorded");
            return;
        }
        let rows = o
            .conflicts
            .iter()
            .map(|c| {
                vec![
                    format!("{}/{}", c.table_name, c.row_key),
                    format!("{}:{} {}", &c.winner.origin_id[..8], c.winner.logical_clock, c.winner.operation),
                    format!("{}:{} {}", &c.loser.origin_id[..8], c.loser.logical_clock, c.loser.operation),
                    c.resolution_reason.clone(),
                ]
            })
            .collect();
        print_table(&["row", "winner", "loser", "reason"], rows);
    });
    Ok(())
}
