use std::path::Path;

use chrono::Utc;
use tandem_core::{EngineConfig, ResourceKey};

use crate::commands::common::{format_operation_lines, open_manager};
use crate::error::CliError;

pub async fn run_history(
    key: &ResourceKey,
    limit: Option<usize>,
    as_json: bool,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<(), CliError> {
    let manager = open_manager(db_path, config).await?;
    // Unknown resources are an error rather than an empty history
    manager.get_state(key).await?;
    let operations = manager.get_operation_history(key, limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
    } else if operations.is_empty() {
        println!("No operations committed to {key}");
    } else {
        for line in format_operation_lines(&operations, Utc::now().timestamp_millis()) {
            println!("{line}");
        }
    }

    Ok(())
}
