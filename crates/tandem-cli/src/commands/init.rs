use std::path::Path;

use tandem_core::{EngineConfig, ResourceKey, ResourceType};

use crate::commands::common::{open_manager, parse_initial_data};
use crate::error::CliError;

pub async fn run_init(
    resource_type: ResourceType,
    id: &str,
    data: Option<&str>,
    user: &str,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<bool, CliError> {
    let initial_data = parse_initial_data(data)?;
    let manager = open_manager(db_path, config).await?;
    let key = ResourceKey::new(resource_type, id);

    let created = manager
        .initialize_resource(resource_type, id, initial_data, user)
        .await?;
    if created {
        println!("Initialized {key} at version 0");
    } else {
        let version = manager.refresh_version(&key).await?;
        println!("{key} already exists at version {version}");
    }
    Ok(created)
}
