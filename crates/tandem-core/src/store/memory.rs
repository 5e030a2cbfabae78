//! In-process store

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::{check_commit, OperationLog, SyncStore, VersionStore};
use crate::error::{Error, Result};
use crate::models::{CommittedOperation, OperationId, ResourceKey, ResourceState};

#[derive(Debug)]
struct StoredResource {
    state: ResourceState,
    initial_data: Value,
    log: Vec<CommittedOperation>,
}

#[derive(Debug, Default)]
struct Inner {
    resources: HashMap<ResourceKey, StoredResource>,
    operation_ids: HashSet<OperationId>,
}

/// Store kept entirely in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for MemoryStore {
    async fn load_state(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
        let inner = self.inner.lock().await;
        Ok(inner.resources.get(key).map(|stored| stored.state.clone()))
    }

    async fn create_state(&self, state: &ResourceState) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = state.key();
        if inner.resources.contains_key(&key) {
            return Ok(false);
        }
        inner.resources.insert(
            key,
            StoredResource {
                state: state.clone(),
                initial_data: state.data.clone(),
                log: Vec::new(),
            },
        );
        Ok(true)
    }
}

impl OperationLog for MemoryStore {
    async fn operations_after(
        &self,
        key: &ResourceKey,
        version: u64,
    ) -> Result<Vec<CommittedOperation>> {
        let inner = self.inner.lock().await;
        Ok(inner.resources.get(key).map_or_else(Vec::new, |stored| {
            stored
                .log
                .iter()
                .filter(|entry| entry.version > version)
                .cloned()
                .collect()
        }))
    }

    async fn recent_operations(
        &self,
        key: &ResourceKey,
        limit: usize,
    ) -> Result<Vec<CommittedOperation>> {
        let inner = self.inner.lock().await;
        Ok(inner.resources.get(key).map_or_else(Vec::new, |stored| {
            stored.log.iter().rev().take(limit).cloned().collect()
        }))
    }

    async fn initial_data(&self, key: &ResourceKey) -> Result<Option<Value>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .resources
            .get(key)
            .map(|stored| stored.initial_data.clone()))
    }
}

impl SyncStore for MemoryStore {
    async fn commit(
        &self,
        expected_version: u64,
        state: &ResourceState,
        entry: &CommittedOperation,
    ) -> Result<u64> {
        check_commit(expected_version, state, entry)?;

        let mut inner = self.inner.lock().await;
        if inner.operation_ids.contains(&entry.operation.id) {
            return Err(Error::Database(format!(
                "Operation {} is already in the log",
                entry.operation.id
            )));
        }

        let key = state.key();
        let stored = inner
            .resources
            .get_mut(&key)
            .ok_or_else(|| Error::ResourceNotFound(key.clone()))?;
        if stored.state.version != expected_version {
            return Err(Error::VersionMismatch {
                expected: expected_version,
                actual: stored.state.version,
            });
        }

        stored.state = state.clone();
        stored.log.push(entry.clone());
        inner.operation_ids.insert(entry.operation.id);
        Ok(state.version)
    }
}
