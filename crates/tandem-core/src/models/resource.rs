//! Resource identity and versioned state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kinds of resources kept in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Workflow,
    Conversation,
    Task,
}

impl ResourceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Conversation => "conversation",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workflow" => Ok(Self::Workflow),
            "conversation" => Ok(Self::Conversation),
            "task" => Ok(Self::Task),
            other => Err(Error::InvalidInput(format!("Unknown resource type: {other}"))),
        }
    }
}

/// Identity of a synchronized resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// Current version and materialized document of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Number of operations committed so far
    pub version: u64,
    /// Document after applying every committed operation
    pub data: Value,
    /// Last modification timestamp (Unix ms)
    pub last_modified: i64,
    /// User behind the last modification
    pub last_modified_by: String,
}

impl ResourceState {
    /// Fresh state at version 0
    #[must_use]
    pub fn initial(key: &ResourceKey, data: Value, user_id: impl Into<String>) -> Self {
        Self {
            resource_type: key.resource_type,
            resource_id: key.resource_id.clone(),
            version: 0,
            data,
            last_modified: chrono::Utc::now().timestamp_millis(),
            last_modified_by: user_id.into(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type, self.resource_id.clone())
    }
}
