use std::path::PathBuf;

use librowsync_core::export::export_json;
use serde::Serialize;

use crate::cli::Cli;
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::output_success;

#[derive(Serialize)]
struct ExportOutput {
    path: String,
    change_count: usize,
    conflict_count: usize,
    cursor_count: usize,
}

pub fn run(cli: &Cli, output: Option<PathBuf>) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let export = export_json(&store)?;

    let Some(path) = output else {
        // No file: the document itself is the output
        println!("{}", serde_json::to_string_pretty(&export)?);
        return Ok(());
    };

    std::fs::write(&path, serde_json::to_string_pretty(&export)?)?;
    output_success(
        cli,
        ExportOutput {
            path: path.display().to_string(),
            change_count: export.changes.len(),
            conflict_count: export.conflicts.len(),
            cursor_count: export.cursors.len(),
        },
        |o| println!("Exported {} change(s) to {}", o.change_count, o.path),
    );
    Ok(())
}
