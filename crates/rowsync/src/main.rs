mod cli;
mod commands;
mod context;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use error::CliError;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run_command(&cli) {
        output::output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable
fn init_logging(cli: &Cli) {
    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_command(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Init {
            label,
            resolution,
            batch_size,
            listen,
        } => commands::init::run(cli, label.clone(), *resolution, *batch_size, listen.clone()),
        Command::Row { cmd } => commands::row::run(cli, cmd.clone()),
        Command::Log { origin, since, limit } => commands::log::run(cli, origin.clone(), *since, *limit),
        Command::Sync {
            peer,
            address,
            timeout_ms,
        } => commands::sync::run(cli, peer, address.clone(), *timeout_ms),
        Command::Peer { cmd } => commands::peer::run(cli, cmd.clone()),
        Command::Cursor { cmd } => commands::cursor::run(cli, cmd.clone()),
        Command::Conflicts { table, key } => commands::conflicts::run(cli, table.clone(), key.clone()),
        Command::Db { cmd } => commands::db::run(cli, cmd.clone()),
        Command::Export { output } => commands::export::run(cli, output.clone()),
    }
}
