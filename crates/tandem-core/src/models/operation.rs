//! Operation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Path, ResourceKey, ResourceType};

/// A unique identifier for an operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The mutation an operation performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert into an array, or assign an object key
    Insert { path: Path, value: Value },
    /// Remove the value at `path`
    Delete {
        path: Path,
        /// Advisory only, for undo and audit
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_value: Option<Value>,
    },
    /// Overwrite the value at `path`
    Update {
        path: Path,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_value: Option<Value>,
    },
    /// Relocate the value at `from` to `to`
    Move { from: Path, to: Path },
}

impl OperationKind {
    pub const fn insert(path: Path, value: Value) -> Self {
        Self::Insert { path, value }
    }

    pub const fn delete(path: Path) -> Self {
        Self::Delete {
            path,
            previous_value: None,
        }
    }

    pub const fn update(path: Path, value: Value) -> Self {
        Self::Update {
            path,
            value,
            previous_value: None,
        }
    }

    pub const fn relocate(from: Path, to: Path) -> Self {
        Self::Move { from, to }
    }

    /// Name stored in the operation log's `operation_type` column
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::Update { .. } => "update",
            Self::Move { .. } => "move",
        }
    }

    /// Every path this operation reads or writes
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::Insert { path, .. } | Self::Delete { path, .. } | Self::Update { path, .. } => {
                vec![path]
            }
            Self::Move { from, to } => vec![from, to],
        }
    }
}

/// A client-authored mutation of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// User who authored the operation
    pub user_id: String,
    /// Client wall-clock timestamp (Unix ms)
    pub timestamp: i64,
    /// Resource version the author observed
    pub base_version: u64,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    /// Create a new operation against `resource`, stamped with the current time
    #[must_use]
    pub fn new(
        resource: &ResourceKey,
        user_id: impl Into<String>,
        base_version: u64,
        kind: OperationKind,
    ) -> Self {
        Self {
            id: OperationId::new(),
            resource_type: resource.resource_type,
            resource_id: resource.resource_id.clone(),
            user_id: user_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            base_version,
            kind,
        }
    }

    /// Override the client timestamp
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, self.resource_id.clone())
    }
}

/// An operation as it was applied, with the version it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedOperation {
    #[serde(flatten)]
    pub operation: Operation,
    /// Resource version after this operation
    pub version: u64,
    /// Commit timestamp (Unix ms)
    pub committed_at: i64,
}

impl CommittedOperation {
    #[must_use]
    pub fn new(operation: Operation, version: u64) -> Self {
        Self {
            operation,
            version,
            committed_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
