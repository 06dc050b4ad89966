use librowsync_core::integrity::check_log_integrity;
use librowsync_core::types::ids::id_to_hex;
use librowsync_core::RowsyncError;
use serde::Serialize;

use crate::cli::{Cli, DbCommand};
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::output_success;

#[derive(Serialize)]
struct DbStatsOutput {
    path: String,
    replica_id: String,
    size_bytes: u64,
    change_count: usize,
    origin_count: usize,
    row_count: usize,
    conflict_count: usize,
    cursor_count: usize,
    generation: u64,
}

pub fn run(cli: &Cli, cmd: DbCommand) -> Result<(), CliError> {
    match cmd {
        DbCommand::Stats => run_stats(cli),
        DbCommand::Check => run_check(cli),
    }
}

fn run_stats(cli: &Cli) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let stats = store.stats()?;

    output_success(
        cli,
        DbStatsOutput {
            path: stats.path,
            replica_id: id_to_hex(store.replica_id()),
            size_bytes: stats.size_bytes,
            change_count: stats.change_count,
            origin_count: stats.origin_count,
            row_count: stats.row_count,
            conflict_count: stats.conflict_count,
            cursor_count: stats.cursor_count,
            generation: stats.generation,
        },
        |s| {
            println!("Replica:    {}", s.replica_id);
            println!("Path:       {}", s.path);
            println!("Size:       {} bytes", s.size_bytes);
            println!("Changes:    {} from {} origin(s)", s.change_count, s.origin_count);
            println!("Rows:       {}", s.row_count);
            println!("Conflicts:  {}", s.conflict_count);
            println!("Cursors:    {}", s.cursor_count);
            println!("Generation: {}", s.generation);
        },
    );
    Ok(())
}

#[derive(Serialize)]
struct DbCheckOutput {
    records_checked: usize,
    records_valid: usize,
    rows_checked: usize,
    issue_count: usize,
    issues: Vec<IssueJson>,
}

#[derive(Serialize)]
struct IssueJson {
    origin_id: String,
    logical_clock: u64,
    kind: &'static str,
    detail: String,
}

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let report = check_log_integrity(&store)?;

    let issues: Vec<IssueJson> = report
        .issues
        .iter()
        .map(|i| IssueJson {
            origin_id: i.origin_id.clone(),
            logical_clock: i.logical_clock,
            kind: i.kind.as_str(),
            detail: i.kind.detail(),
        })
        .collect();

    output_success(
        cli,
        DbCheckOutput {
            records_checked: report.records_checked,
            records_valid: report.records_valid,
            rows_checked: report.rows_checked,
            issue_count: issues.len(),
            issues,
        },
        |o| {
            println!(
                "Checked {} record(s) and {} row(s): {} valid",
                o.records_checked, o.rows_checked, o.records_valid
            );
            for issue in &o.issues {
                println!("  {}:{} {} ({})", issue.origin_id, issue.logical_clock, issue.kind, issue.detail);
            }
        },
    );

    if !report.is_healthy() {
        return Err(RowsyncError::Internal(format!("{} integrity issue(s) found", report.issue_count())).into());
    }
    Ok(())
}
