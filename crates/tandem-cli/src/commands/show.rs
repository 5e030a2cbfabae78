use std::path::Path;

use tandem_core::{EngineConfig, ResourceKey};

use crate::commands::common::open_manager;
use crate::error::CliError;

pub async fn run_show(key: &ResourceKey, db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let manager = open_manager(db_path, config).await?;
    let state = manager.get_state(key).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

pub async fn run_version(
    key: &ResourceKey,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<u64, CliError> {
    let manager = open_manager(db_path, config).await?;
    let version = manager
        .get_version(key.resource_type, &key.resource_id)
        .await?;
    println!("{version}");
    Ok(version)
}
