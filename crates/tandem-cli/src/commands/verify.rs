use std::path::Path;

use tandem_core::{EngineConfig, ResourceKey};

use crate::commands::common::open_manager;
use crate::error::CliError;

pub async fn run_verify(key: &ResourceKey, db_path: &Path, config: &EngineConfig) -> Result<(), CliError> {
    let manager = open_manager(db_path, config).await?;
    if !manager.verify(key).await? {
        return Err(CliError::VerifyFailed(key.clone()));
    }

    let version = manager.refresh_version(key).await?;
    println!("{key}: log replays to the stored document at version {version}");
    Ok(())
}
