use librowsync_core::config::load_config;
use librowsync_core::types::ids::{generate_origin_id, id_to_hex};
use librowsync_core::{ReplicaConfig, ResolutionPolicy, RowsyncError};
use serde::Serialize;

use crate::cli::{Cli, ResolutionArg};
use crate::context::{data_dir, RowsyncContext};
use crate::error::CliError;
use crate::output::output_success;

#[derive(Serialize)]
struct InitOutput {
    replica_id: String,
    data_dir: String,
    resolution: &'static str,
    batch_size: usize,
}

pub fn run(
    cli: &Cli,
    label: Option<String>,
    resolution: ResolutionArg,
    batch_size: Option<usize>,
    listen: Option<String>,
) -> Result<(), CliError> {
    let data_dir = data_dir(cli);
    if load_config(&data_dir)?.is_some() {
        return Err(RowsyncError::InvalidArgs(format!(
            "a replica already exists in {}",
            data_dir.display()
        ))
        .into());
    }
    if batch_size == Some(0) {
        return Err(RowsyncError::InvalidArgs("--batch-size must be at least 1".to_string()).into());
    }

    let replica_id = generate_origin_id();
    let mut config = ReplicaConfig::new(&replica_id, label);
    config.resolution = Some(match resolution {
        ResolutionArg::Symmetric => ResolutionPolicy::Symmetric,
        ResolutionArg::DeleteWins => ResolutionPolicy::DeleteWins,
    });
    config.batch_size = batch_size;
    config.listen = listen;

    let ctx = RowsyncContext { data_dir, config };
    ctx.save()?;
    let store = ctx.open_store()?;
    store.flush()?;

    output_success(
        cli,
        InitOutput {
            replica_id: id_to_hex(&replica_id),
            data_dir: ctx.data_dir.display().to_string(),
            resolution: ctx.config.resolution().as_str(),
            batch_size: ctx.config.batch_size(),
        },
        |o| {
            println!("Initialised replica {} in {}", o.replica_id, o.data_dir);
            println!("Resolution policy: {}", o.resolution);
        },
    );
    Ok(())
}
