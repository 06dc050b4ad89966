use librowsync_core::export::ChangeJson;
use librowsync_core::types::ids::parse_origin_id;
use librowsync_core::{ChangeIter, RowsyncError};
use serde::Serialize;

use crate::cli::Cli;
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::output_success;

#[derive(Serialize)]
struct LogOutput {
    changes: Vec<ChangeJson>,
    truncated: bool,
}

pub fn run(cli: &Cli, origin: Option<String>, since: u64, limit: Option<usize>) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let limit = limit.unwrap_or(usize::MAX);

    let records: ChangeIter = match origin {
        Some(hex) => {
            let origin = parse_origin_id(&hex).map_err(RowsyncError::from)?;
            store.log().query_since(&origin, since).iter()
        }
        None => store.log().iter_all(),
    };

    let mut changes = Vec::new();
    let mut truncated = false;
    for record in records {
        if changes.len() == limit {
            truncated = true;
            break;
        }
        changes.push(ChangeJson::from(&record?));
    }

    output_success(cli, LogOutput { changes, truncated }, |o| {
        for c in &o.changes {
            println!(
                "{}:{:<6} {:<6} {}/{}  {}",
                &c.origin_id[..8],
                c.logical_clock,
                c.operation,
                c.table_name,
                c.row_key,
                format_wall_time(c.wall_time_ms)
            );
        }
        if o.truncated {
            println!("(more records not shown)");
        }
    });
    Ok(())
}

/// Authoring time as recorded by the origin; informational only
fn format_wall_time(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
