use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tandem_core::{
    ApplyOutcome, EngineConfig, Operation, OperationId, OperationKind, ResourceKey, ResourceType,
};

use crate::commands::common::{
    describe_operation, open_manager, resolve_operation_text, Manager,
};
use crate::error::CliError;

/// Operation as typed by a user. Paths may be JSON Pointers or segment arrays,
/// and the base version defaults to the resource's current version.
#[derive(Debug, Deserialize)]
pub struct OperationInput {
    #[serde(default)]
    pub id: Option<OperationId>,
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub base_version: Option<u64>,
    #[serde(flatten)]
    pub kind: KindInput,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindInput {
    Insert {
        path: PathInput,
        value: Value,
    },
    Delete {
        path: PathInput,
    },
    Update {
        path: PathInput,
        value: Value,
    },
    Move {
        from: PathInput,
        to: PathInput,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PathInput {
    Pointer(String),
    Segments(tandem_core::Path),
}

impl PathInput {
    fn into_path(self) -> Result<tandem_core::Path, CliError> {
        match self {
            Self::Pointer(pointer) => Ok(tandem_core::Path::from_pointer(&pointer)?),
            Self::Segments(path) => Ok(path),
        }
    }
}

fn default_user() -> String {
    "cli".to_string()
}

impl KindInput {
    fn into_kind(self) -> Result<OperationKind, CliError> {
        Ok(match self {
            Self::Insert { path, value } => OperationKind::insert(path.into_path()?, value),
            Self::Delete { path } => OperationKind::delete(path.into_path()?),
            Self::Update { path, value } => OperationKind::update(path.into_path()?, value),
            Self::Move { from, to } => OperationKind::relocate(from.into_path()?, to.into_path()?),
        })
    }
}

pub fn parse_operation_input(text: &str) -> Result<OperationInput, CliError> {
    serde_json::from_str(text).map_err(|error| CliError::InvalidOperation(error.to_string()))
}

/// Turn user input into a full operation, filling in defaults
pub async fn build_operation(input: OperationInput, manager: &Manager) -> Result<Operation, CliError> {
    let key = ResourceKey::new(input.resource_type, input.resource_id);
    let base_version = match input.base_version {
        Some(version) => version,
        None => manager.refresh_version(&key).await?,
    };

    let mut operation = Operation::new(&key, input.user_id, base_version, input.kind.into_kind()?);
    if let Some(id) = input.id {
        operation.id = id;
    }
    if let Some(timestamp) = input.timestamp {
        operation = operation.with_timestamp(timestamp);
    }
    Ok(operation)
}

pub async fn run_apply(
    argument: Option<&str>,
    file: Option<&Path>,
    client_id: &str,
    as_json: bool,
    db_path: &Path,
    config: &EngineConfig,
) -> Result<ApplyOutcome, CliError> {
    let text = resolve_operation_text(argument, file)?;
    let input = parse_operation_input(&text)?;
    let manager = open_manager(db_path, config).await?;
    let operation = build_operation(input, &manager).await?;
    let key = operation.resource_key();
    let operation_id = operation.id;

    let outcome = manager.apply_operation(operation, client_id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        match &outcome {
            ApplyOutcome::Applied { new_version } => {
                println!("Applied {operation_id} to {key} at version {new_version}");
            }
            ApplyOutcome::Rejected { conflicts, .. } => {
                println!("Rejected {operation_id}; conflicts with:");
                for conflict in conflicts {
                    println!(
                        "  v{} {} by {}",
                        conflict.version,
                        describe_operation(&conflict.operation.kind),
                        conflict.operation.user_id
                    );
                }
            }
        }
    }

    match outcome {
        ApplyOutcome::Rejected {
            current_version, ..
        } => Err(CliError::Rejected { current_version }),
        applied @ ApplyOutcome::Applied { .. } => Ok(applied),
    }
}
