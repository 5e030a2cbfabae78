//! Commit events and apply outcomes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CommittedOperation;
use crate::error::{Error, Result};

/// Notification delivered to subscribers after a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub event_id: Uuid,
    /// The operation as applied, with its final version
    pub operation: CommittedOperation,
    /// Client connection that submitted the operation
    pub originating_client_id: String,
    /// Event creation timestamp (Unix ms)
    pub timestamp: i64,
}

impl SyncEvent {
    #[must_use]
    pub fn new(operation: CommittedOperation, originating_client_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            operation,
            originating_client_id: originating_client_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn version(&self) -> u64 {
        self.operation.version
    }
}

/// Result of submitting an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The operation (possibly transformed) was committed
    Applied { new_version: u64 },
    /// The operation conflicts with newer work; rebase and resubmit
    Rejected {
        current_version: u64,
        conflicts: Vec<CommittedOperation>,
    },
}

impl ApplyOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Version produced by a successful apply
    pub const fn new_version(&self) -> Option<u64> {
        match self {
            Self::Applied { new_version } => Some(*new_version),
            Self::Rejected { .. } => None,
        }
    }

    /// Convert a rejection into [`Error::Conflict`]
    pub fn into_result(self) -> Result<u64> {
        match self {
            Self::Applied { new_version } => Ok(new_version),
            Self::Rejected {
                current_version,
                conflicts,
            } => Err(Error::Conflict {
                current_version,
                conflicts,
            }),
        }
    }
}
