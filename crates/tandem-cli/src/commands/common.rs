use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tandem_core::{CommittedOperation, EngineConfig, LibSqlStore, OperationKind, SyncManager};

use crate::error::CliError;

pub type Manager = SyncManager<LibSqlStore>;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &EngineConfig) -> PathBuf {
    cli_db_path
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
        .join("tandem.db")
}

pub async fn open_manager(db_path: &Path, config: &EngineConfig) -> Result<Manager, CliError> {
    let store = LibSqlStore::open(db_path).await?;
    Ok(SyncManager::new(store, config.clone()))
}

pub fn normalize_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_input(&buffer))
}

/// Operation text from the argument, a file, or piped stdin, in that order
pub fn resolve_operation_text(
    argument: Option<&str>,
    file: Option<&Path>,
) -> Result<String, CliError> {
    if let Some(text) = argument.and_then(normalize_input) {
        return Ok(text);
    }

    if let Some(path) = file {
        return normalize_input(&std::fs::read_to_string(path)?).ok_or(CliError::EmptyOperation);
    }

    read_piped_stdin()?.ok_or(CliError::EmptyOperation)
}

pub fn parse_initial_data(data: Option<&str>) -> Result<Value, CliError> {
    match data.and_then(normalize_input) {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

pub fn describe_operation(kind: &OperationKind) -> String {
    match kind {
        OperationKind::Insert { path, value } => format!("insert {path} = {value}"),
        OperationKind::Update { path, value, .. } => format!("update {path} = {value}"),
        OperationKind::Delete { path, .. } => format!("delete {path}"),
        OperationKind::Move { from, to } => format!("move {from} -> {to}"),
    }
}

pub fn format_operation_lines(operations: &[CommittedOperation], now_ms: i64) -> Vec<String> {
    operations
        .iter()
        .map(|entry| {
            format!(
                "v{:<4} {:<10} {}  by {}  (base {})",
                entry.version,
                format_relative_time(entry.committed_at, now_ms),
                describe_operation(&entry.operation.kind),
                entry.operation.user_id,
                entry.operation.base_version
            )
        })
        .collect()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format_timestamp(timestamp_ms)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d").to_string(),
    )
}
