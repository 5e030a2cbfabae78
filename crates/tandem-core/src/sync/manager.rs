//! The apply pipeline

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use super::broadcast::{Broadcaster, SubscriberError, Subscription};
use super::transform::{TransformOutcome, Transformer};
use crate::config::EngineConfig;
use crate::document;
use crate::error::{Error, Result};
use crate::models::{
    ApplyOutcome, CommittedOperation, Operation, ResourceKey, ResourceState, ResourceType,
    SyncEvent,
};
use crate::store::SyncStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last version seen per resource. Advisory only; the store is authoritative.
#[derive(Debug, Default)]
struct VersionCache {
    versions: Mutex<HashMap<ResourceKey, u64>>,
}

impl VersionCache {
    fn get(&self, key: &ResourceKey) -> Option<u64> {
        lock(&self.versions).get(key).copied()
    }

    fn set(&self, key: &ResourceKey, version: u64) {
        lock(&self.versions).insert(key.clone(), version);
    }

    fn forget(&self, key: &ResourceKey) {
        lock(&self.versions).remove(key);
    }

    fn clear(&self) {
        lock(&self.versions).clear();
    }
}

/// One async mutex per resource with an apply in flight
#[derive(Debug, Default)]
struct ResourceLocks {
    locks: Mutex<HashMap<ResourceKey, Arc<AsyncMutex<()>>>>,
}

impl ResourceLocks {
    fn lease(&self, key: &ResourceKey) -> LockLease<'_> {
        let handle = Arc::clone(lock(&self.locks).entry(key.clone()).or_default());
        LockLease {
            locks: self,
            key: key.clone(),
            handle,
        }
    }

    fn len(&self) -> usize {
        lock(&self.locks).len()
    }
}

/// Shared claim on a resource's mutex; the map entry is pruned when the last
/// lease goes away
struct LockLease<'a> {
    locks: &'a ResourceLocks,
    key: ResourceKey,
    handle: Arc<AsyncMutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = lock(&self.locks.locks);
        // One reference in the map, one held here
        if Arc::strong_count(&self.handle) <= 2 {
            locks.remove(&self.key);
        }
    }
}

/// Coordinates version checks, transformation, persistence and broadcast for
/// every resource in a store
pub struct SyncManager<S> {
    store: S,
    config: EngineConfig,
    transformer: Transformer,
    broadcaster: Broadcaster,
    versions: VersionCache,
    locks: ResourceLocks,
}

impl<S> std::fmt::Debug for SyncManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("config", &self.config)
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}

impl<S: SyncStore> SyncManager<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            transformer: Transformer::new(config.conflict_policy),
            store,
            config,
            broadcaster: Broadcaster::new(),
            versions: VersionCache::default(),
            locks: ResourceLocks::default(),
        }
    }

    pub const fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Validate, transform, commit and broadcast an operation.
    ///
    /// Conflicts come back as [`ApplyOutcome::Rejected`] with the operations
    /// the caller has to rebase onto. `Err` means nothing was committed.
    pub async fn apply_operation(
        &self,
        operation: Operation,
        client_id: &str,
    ) -> Result<ApplyOutcome> {
        let key = operation.resource_key();
        tracing::debug!(
            stage = "received",
            "Operation {} ({}) for {} at base version {}",
            operation.id,
            operation.kind.type_name(),
            key,
            operation.base_version
        );

        let lease = self.locks.lease(&key);
        let _guard = lease.handle.lock().await;

        let mut retries = 0;
        loop {
            match self.try_apply(&key, &operation, client_id).await {
                Err(Error::VersionMismatch { expected, actual })
                    if retries < self.config.max_commit_retries =>
                {
                    retries += 1;
                    self.versions.forget(&key);
                    tracing::warn!(
                        "Lost commit race on {} (expected version {}, found {}), retry {}/{}",
                        key,
                        expected,
                        actual,
                        retries,
                        self.config.max_commit_retries
                    );
                }
                Err(error) => {
                    if matches!(error, Error::VersionMismatch { .. }) {
                        self.versions.forget(&key);
                    }
                    return Err(error);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    async fn try_apply(
        &self,
        key: &ResourceKey,
        operation: &Operation,
        client_id: &str,
    ) -> Result<ApplyOutcome> {
        let state = self
            .store
            .load_state(key)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(key.clone()))?;

        let current = state.version;
        let base = operation.base_version;
        if base > current {
            tracing::warn!(
                "Operation {} claims base version {} but {} is at {}",
                operation.id,
                base,
                key,
                current
            );
            return Err(Error::InvalidVersion { base, current });
        }
        tracing::debug!(stage = "version_checked", "{} is at version {}", key, current);

        let operation = if base == current {
            tracing::debug!(stage = "direct", "Operation {} is current", operation.id);
            operation.clone()
        } else {
            let pending = self.store.operations_after(key, base).await?;
            tracing::debug!(
                stage = "transforming",
                "Transforming operation {} past {} pending operation(s)",
                operation.id,
                pending.len()
            );
            match self.transformer.transform(operation, &pending) {
                TransformOutcome::Transformed(transformed) => transformed,
                TransformOutcome::Rejected(conflicts) => {
                    tracing::warn!(
                        "Rejected operation {} on {}: conflicts with {} newer operation(s)",
                        operation.id,
                        key,
                        conflicts.len()
                    );
                    self.versions.set(key, current);
                    return Ok(ApplyOutcome::Rejected {
                        current_version: current,
                        conflicts,
                    });
                }
            }
        };

        let new_version = current + 1;
        let next = ResourceState {
            version: new_version,
            data: document::apply(&state.data, &operation.kind),
            last_modified: chrono::Utc::now().timestamp_millis(),
            last_modified_by: operation.user_id.clone(),
            ..state
        };
        tracing::debug!(stage = "applied", "Built version {} of {}", new_version, key);

        let entry = CommittedOperation::new(operation, new_version);
        let committed = self.store.commit(current, &next, &entry).await?;
        self.versions.set(key, committed);
        tracing::info!(
            "Committed operation {} to {} at version {}",
            entry.operation.id,
            key,
            committed
        );

        let event = SyncEvent::new(entry, client_id);
        let delivered = self.broadcaster.publish(&key.resource_id, &event);
        tracing::debug!(
            stage = "broadcast",
            "Delivered version {} of {} to {} subscriber(s)",
            committed,
            key,
            delivered
        );

        Ok(ApplyOutcome::Applied {
            new_version: committed,
        })
    }

    /// Current version of a resource, from the cache when possible
    pub async fn get_version(&self, resource_type: ResourceType, resource_id: &str) -> Result<u64> {
        let key = ResourceKey::new(resource_type, resource_id);
        if let Some(version) = self.versions.get(&key) {
            return Ok(version);
        }
        self.refresh_version(&key).await
    }

    /// Reload a resource's version from the store
    pub async fn refresh_version(&self, key: &ResourceKey) -> Result<u64> {
        let version = self.get_state(key).await?.version;
        self.versions.set(key, version);
        Ok(version)
    }

    /// Create a resource at version 0. Returns `false` (and changes nothing)
    /// if it already exists.
    pub async fn initialize_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        initial_data: Value,
        user_id: &str,
    ) -> Result<bool> {
        let key = ResourceKey::new(resource_type, resource_id);
        let state = ResourceState::initial(&key, initial_data, user_id);
        let created = self.store.create_state(&state).await?;
        if created {
            self.versions.set(&key, 0);
            tracing::info!("Initialized {} for {}", key, user_id);
        } else {
            tracing::debug!("{} already initialized", key);
        }
        Ok(created)
    }

    /// Committed operations, most recent first. `None` uses the configured
    /// history limit.
    pub async fn get_operation_history(
        &self,
        key: &ResourceKey,
        limit: Option<usize>,
    ) -> Result<Vec<CommittedOperation>> {
        let limit = limit.unwrap_or(self.config.history_limit);
        self.store.recent_operations(key, limit).await
    }

    /// Operations committed after `version`, oldest first
    pub async fn operations_since(
        &self,
        key: &ResourceKey,
        version: u64,
    ) -> Result<Vec<CommittedOperation>> {
        self.store.operations_after(key, version).await
    }

    pub async fn get_state(&self, key: &ResourceKey) -> Result<ResourceState> {
        self.store
            .load_state(key)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(key.clone()))
    }

    /// Rebuild a resource's document from its initial data and the full log
    pub async fn replay(&self, key: &ResourceKey) -> Result<Value> {
        let initial = self
            .store
            .initial_data(key)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(key.clone()))?;
        let log = self.store.operations_after(key, 0).await?;
        Ok(document::replay(
            &initial,
            log.iter().map(|entry| &entry.operation.kind),
        ))
    }

    /// Whether replaying the log reproduces the stored document
    pub async fn verify(&self, key: &ResourceKey) -> Result<bool> {
        let replayed = self.replay(key).await?;
        let state = self.get_state(key).await?;
        let matches = replayed == state.data;
        if !matches {
            tracing::warn!(
                "Replaying {} operation(s) of {} does not reproduce the stored document",
                state.version,
                key
            );
        }
        Ok(matches)
    }

    /// Receive an event for every operation committed on `resource_id`
    pub fn subscribe<F>(&self, resource_id: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(resource_id, callback)
    }

    /// Drop all subscribers and cached versions
    pub fn shutdown(&self) {
        let resources = self.broadcaster.resource_count();
        self.broadcaster.clear();
        self.versions.clear();
        tracing::info!(
            "Sync manager shut down ({} subscribed resource(s) released)",
            resources
        );
    }

    /// Resources with an apply in flight
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}
