use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use serde::Serialize;

use crate::cli::Cli;
use crate::error::CliError;

pub const JSON_SCHEMA_VERSION: u32 = 1;

/// JSON response envelope
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub schema_version: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
}

#[derive(Serialize)]
pub struct JsonError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"ok\":false,\"error\":\"{}\"}}", e))
}

/// Output a successful result.
///
/// `human` renders the data for terminal output; it is skipped for `--json`
/// and `--quiet`.
pub fn output_success<T: Serialize>(cli: &Cli, data: T, human: impl FnOnce(&T)) {
    if cli.json {
        let response = JsonResponse {
            schema_version: JSON_SCHEMA_VERSION,
            ok: true,
            data: Some(data),
            error: None,
        };
        println!("{}", to_pretty(&response));
    } else if !cli.quiet {
        human(&data);
    }
}

/// Output an error
pub fn output_error(cli: &Cli, err: &CliError) {
    let suggestions = err.suggestions();
    if cli.json {
        let details = if suggestions.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!({ "suggestions": suggestions })
        };

        let response: JsonResponse<()> = JsonResponse {
            schema_version: JSON_SCHEMA_VERSION,
            ok: false,
            data: None,
            error: Some(JsonError {
                code: err.error_code().to_string(),
                message: err.to_string(),
                details,
            }),
        };
        eprintln!("{}", to_pretty(&response));
    } else {
        eprintln!("error: {}", err);
        if !suggestions.is_empty() {
            eprintln!();
            eprintln!("Suggestions:");
            for suggestion in suggestions {
                eprintln!("  - {}", suggestion);
            }
        }
    }
}

/// Print a table with a header row
pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}
