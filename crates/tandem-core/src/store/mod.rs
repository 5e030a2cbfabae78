//! Persistence contracts for resource state and the operation log

mod memory;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{CommittedOperation, ResourceKey, ResourceState};

pub use memory::MemoryStore;

/// Current state of each resource (async)
#[allow(async_fn_in_trait)]
pub trait VersionStore {
    /// Load the state of a resource, if it was ever initialized
    async fn load_state(&self, key: &ResourceKey) -> Result<Option<ResourceState>>;

    /// Create a resource at version 0. Returns `false` if it already existed,
    /// leaving the stored state untouched.
    async fn create_state(&self, state: &ResourceState) -> Result<bool>;
}

/// Append-only record of committed operations (async)
#[allow(async_fn_in_trait)]
pub trait OperationLog {
    /// Operations with a version strictly greater than `version`, ascending
    async fn operations_after(
        &self,
        key: &ResourceKey,
        version: u64,
    ) -> Result<Vec<CommittedOperation>>;

    /// Up to `limit` operations, most recent first
    async fn recent_operations(
        &self,
        key: &ResourceKey,
        limit: usize,
    ) -> Result<Vec<CommittedOperation>>;

    /// Document the resource was initialized with
    async fn initial_data(&self, key: &ResourceKey) -> Result<Option<Value>>;
}

/// A store that can commit state and log together
#[allow(async_fn_in_trait)]
pub trait SyncStore: VersionStore + OperationLog {
    /// Replace the state and append `entry`, both or neither.
    ///
    /// Succeeds only while the stored version still equals
    /// `expected_version`; otherwise fails with [`Error::VersionMismatch`]
    /// and writes nothing. Returns the new version.
    async fn commit(
        &self,
        expected_version: u64,
        state: &ResourceState,
        entry: &CommittedOperation,
    ) -> Result<u64>;
}

/// Reject commits whose records disagree with each other
pub(crate) fn check_commit(
    expected_version: u64,
    state: &ResourceState,
    entry: &CommittedOperation,
) -> Result<()> {
    let next = expected_version + 1;
    if state.version != next || entry.version != next {
        return Err(Error::InvalidInput(format!(
            "Commit after version {expected_version} must produce version {next}, got state {} and entry {}",
            state.version, entry.version
        )));
    }
    if entry.operation.resource_key() != state.key() {
        return Err(Error::InvalidInput(format!(
            "Operation targets {} but state is {}",
            entry.operation.resource_key(),
            state.key()
        )));
    }
    Ok(())
}
