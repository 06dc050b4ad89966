use librowsync_core::export::ChangeJson;
use librowsync_core::types::ids::{id_to_hex, short_hex};
use librowsync_core::{ColumnValue, Payload, RowsyncError, SnapshotStore};
use serde::Serialize;

use crate::cli::{Cli, RowCommand};
use crate::context::RowsyncContext;
use crate::error::CliError;
use crate::output::{output_success, print_table};

pub fn run(cli: &Cli, cmd: RowCommand) -> Result<(), CliError> {
    match cmd {
        RowCommand::Put { table, key, values } => run_put(cli, &table, &key, &values),
        RowCommand::Delete { table, key } => run_delete(cli, &table, &key),
        RowCommand::Get { table, key } => run_get(cli, &table, &key),
        RowCommand::List { table } => run_list(cli, &table),
        RowCommand::History { table, key } => run_history(cli, &table, &key),
    }
}

/// Parse `name=value` column assignments
fn parse_values(values: &[String]) -> Result<Payload, RowsyncError> {
    let mut payload = Payload::new();
    for item in values {
        let (name, literal) = item.split_once('=').ok_or_else(|| {
            RowsyncError::InvalidArgs(format!("expected name=value, got '{}'", item))
        })?;
        if name.is_empty() {
            return Err(RowsyncError::InvalidArgs(format!("empty column name in '{}'", item)));
        }
        payload.insert(name.to_string(), ColumnValue::parse_literal(literal));
    }
    Ok(payload)
}

pub(crate) fn format_payload(payload: &Payload) -> String {
    payload
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_change(verb: &str, change: &ChangeJson) {
    println!(
        "{} {}/{} at {}:{}",
        verb,
        change.table_name,
        change.row_key,
        &change.origin_id[..8],
        change.logical_clock
    );
}

fn run_put(cli: &Cli, table: &str, key: &str, values: &[String]) -> Result<(), CliError> {
    let payload = parse_values(values)?;
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let record = store.put_row(table, key, payload)?;

    output_success(cli, ChangeJson::from(&record), |c| print_change(&c.operation, c));
    Ok(())
}

fn run_delete(cli: &Cli, table: &str, key: &str) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let record = store.delete_row(table, key)?;

    output_success(cli, ChangeJson::from(&record), |c| print_change("delete", c));
    Ok(())
}

#[derive(Serialize)]
struct VersionJson {
    origin_id: String,
    logical_clock: u64,
    operation: &'static str,
}

#[derive(Serialize)]
struct RowOutput {
    table_name: String,
    row_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<VersionJson>,
}

fn run_get(cli: &Cli, table: &str, key: &str) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let payload = store.snapshot().read_row(table, key)?;
    let version = store.log().winning_version(table, key)?;
    if payload.is_none() && version.is_none() {
        return Err(RowsyncError::NotFound(format!("row {}/{}", table, key)).into());
    }

    let output = RowOutput {
        table_name: table.to_string(),
        row_key: key.to_string(),
        payload,
        version: version.map(|v| VersionJson {
            origin_id: id_to_hex(&v.origin_id),
            logical_clock: v.logical_clock,
            operation: v.operation.as_str(),
        }),
    };
    output_success(cli, output, |o| {
        match &o.payload {
            Some(p) => println!("{}/{}: {}", o.table_name, o.row_key, format_payload(p)),
            None => println!("{}/{}: deleted", o.table_name, o.row_key),
        }
        if let Some(v) = &o.version {
            println!("version: {} by {} at clock {}", v.operation, &v.origin_id[..8], v.logical_clock);
        }
    });
    Ok(())
}

#[derive(Serialize)]
struct RowEntry {
    row_key: String,
    payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logical_clock: Option<u64>,
}

#[derive(Serialize)]
struct RowListOutput {
    table_name: String,
    rows: Vec<RowEntry>,
}

fn run_list(cli: &Cli, table: &str) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;

    let mut rows = Vec::new();
    for (row_key, payload) in store.snapshot().list_rows(table)? {
        let version = store.log().winning_version(table, &row_key)?;
        rows.push(RowEntry {
            row_key,
            payload,
            origin_id: version.map(|v| id_to_hex(&v.origin_id)),
            logical_clock: version.map(|v| v.logical_clock),
        });
    }

    output_success(
        cli,
        RowListOutput {
            table_name: table.to_string(),
            rows,
        },
        |o| {
            if o.rows.is_empty() {
                println!("No rows in {}", o.table_name);
                return;
            }
            let rows = o
                .rows
                .iter()
                .map(|r| {
                    vec![
                        r.row_key.clone(),
                        format_payload(&r.payload),
                        r.origin_id.as_deref().map(|s| s[..8].to_string()).unwrap_or_default(),
                        r.logical_clock.map(|c| c.to_string()).unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(&["key", "columns", "origin", "clock"], rows);
        },
    );
    Ok(())
}

#[derive(Serialize)]
struct HistoryOutput {
    table_name: String,
    row_key: String,
    changes: Vec<ChangeJson>,
    conflicts: usize,
}

fn run_history(cli: &Cli, table: &str, key: &str) -> Result<(), CliError> {
    let ctx = RowsyncContext::resolve(cli)?;
    let store = ctx.open_store()?;
    let changes: Vec<ChangeJson> = store.log().row_history(table, key)?.iter().map(ChangeJson::from).collect();
    let conflicts = store.conflicts().for_row(table, key)?.len();
    let winner = store.log().winning_version(table, key)?;

    output_success(
        cli,
        HistoryOutput {
            table_name: table.to_string(),
            row_key: key.to_string(),
            changes,
            conflicts,
        },
        |o| {
            for c in &o.changes {
                let marker = match winner {
                    Some(w) if id_to_hex(&w.origin_id) == c.origin_id && w.logical_clock == c.logical_clock => "*",
                    _ => " ",
                };
                println!("{} {}:{} {}", marker, &c.origin_id[..8], c.logical_clock, c.operation);
            }
            if o.conflicts > 0 {
                println!("{} conflict(s) recorded, see 'rowsync conflicts --table {} --key {}'", o.conflicts, o.table_name, o.row_key);
            }
            if let Some(w) = winner {
                println!("current version from {}", short_hex(&w.origin_id));
            }
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        let payload = parse_values(&["name=Sari".to_string(), "age=41".to_string(), "note=".to_string()]).unwrap();
        assert_eq!(payload.get("name"), Some(&ColumnValue::Text("Sari".to_string())));
        assert_eq!(payload.get("age"), Some(&ColumnValue::Integer(41)));
        assert_eq!(payload.get("note"), Some(&ColumnValue::Text(String::new())));
    }

    #[test]
    fn test_parse_values_rejects_missing_equals() {
        assert!(parse_values(&["oops".to_string()]).is_err());
        assert!(parse_values(&["=1".to_string()]).is_err());
    }
}
