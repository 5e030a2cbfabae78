use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use super::SyncManager;
use crate::config::{ConflictPolicy, EngineConfig};
use crate::db::LibSqlStore;
use crate::error::{Error, Result};
use crate::models::{
    ApplyOutcome, CommittedOperation, Operation, OperationKind, Path, ResourceKey, ResourceState,
    ResourceType, SyncEvent,
};
use crate::store::{MemoryStore, OperationLog, SyncStore, VersionStore};

fn key() -> ResourceKey {
    ResourceKey::new(ResourceType::Workflow, "wf-1")
}

fn op(base_version: u64, kind: OperationKind, timestamp: i64) -> Operation {
    Operation::new(&key(), "user-1", base_version, kind).with_timestamp(timestamp)
}

fn items(index: usize) -> Path {
    Path::root().key("items").index(index)
}

fn title(value: &str) -> OperationKind {
    OperationKind::update(Path::root().key("title"), json!(value))
}

async fn manager_with<S: SyncStore>(store: S, config: EngineConfig, data: Value) -> SyncManager<S> {
    let manager = SyncManager::new(store, config);
    assert!(manager
        .initialize_resource(ResourceType::Workflow, "wf-1", data, "user-1")
        .await
        .unwrap());
    manager
}

async fn memory_manager(data: Value) -> SyncManager<MemoryStore> {
    manager_with(MemoryStore::new(), EngineConfig::default(), data).await
}

async fn apply(manager: &SyncManager<impl SyncStore>, operation: Operation) -> ApplyOutcome {
    manager.apply_operation(operation, "client-1").await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn versions_increase_by_one_per_commit() {
    let manager = memory_manager(json!({"title": ""})).await;

    for (base, text) in [(0, "a"), (1, "b"), (2, "c")] {
        let outcome = apply(&manager, op(base, title(text), 10)).await;
        assert_eq!(outcome.new_version(), Some(base + 1));
    }

    assert_eq!(
        manager.get_version(ResourceType::Workflow, "wf-1").await.unwrap(),
        3
    );
    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.data, json!({"title": "c"}));
    assert_eq!(state.last_modified_by, "user-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_insert_shifts_past_earlier_insert() {
    let manager = memory_manager(json!({"items": ["a", "b"]})).await;

    let first = op(0, OperationKind::insert(items(0), json!("Y")), 100);
    let second = op(0, OperationKind::insert(items(1), json!("X")), 50);
    assert_eq!(apply(&manager, first).await.new_version(), Some(1));
    assert_eq!(apply(&manager, second).await.new_version(), Some(2));

    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.data, json!({"items": ["Y", "a", "X", "b"]}));

    // The log records the operation as applied, not as submitted
    let history = manager.get_operation_history(&key(), Some(1)).await.unwrap();
    assert_eq!(
        history[0].operation.kind,
        OperationKind::insert(items(2), json!("X"))
    );
    assert_eq!(history[0].operation.base_version, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn older_conflicting_update_is_rejected() {
    let manager = memory_manager(json!({"title": "draft"})).await;

    apply(&manager, op(0, title("B"), 200)).await;
    let outcome = apply(&manager, op(0, title("A"), 100)).await;

    let ApplyOutcome::Rejected {
        current_version,
        conflicts,
    } = outcome
    else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert_eq!(current_version, 1);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].operation.kind, title("B"));

    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.data, json!({"title": "B"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_conflicting_update_wins_by_client_timestamp() {
    let manager = memory_manager(json!({"title": "draft"})).await;

    apply(&manager, op(0, title("B"), 100)).await;
    assert!(apply(&manager, op(0, title("A"), 200)).await.is_success());
    assert_eq!(
        manager.get_state(&key()).await.unwrap().data,
        json!({"title": "A"})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn commit_order_policy_rejects_any_stale_conflict() {
    let config = EngineConfig::default().with_conflict_policy(ConflictPolicy::CommitOrder);
    let manager = manager_with(MemoryStore::new(), config, json!({"title": "draft"})).await;

    apply(&manager, op(0, title("B"), 100)).await;
    let outcome = apply(&manager, op(0, title("A"), 200)).await;
    assert!(!outcome.is_success());
    assert!(matches!(
        outcome.into_result(),
        Err(Error::Conflict {
            current_version: 1,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitted_operation_is_not_applied_twice() {
    let manager = memory_manager(json!({"items": []})).await;
    let operation = op(
        0,
        OperationKind::insert(Path::root().key("items").end(), json!("once")),
        10,
    );

    assert!(apply(&manager, operation.clone()).await.is_success());
    let outcome = apply(&manager, operation).await;
    assert!(matches!(
        outcome,
        ApplyOutcome::Rejected {
            current_version: 1,
            ..
        }
    ));

    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.data, json!({"items": ["once"]}));
    assert_eq!(manager.operations_since(&key(), 0).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn future_base_version_is_invalid() {
    let manager = memory_manager(json!({})).await;
    let error = manager
        .apply_operation(op(5, title("x"), 1), "client-1")
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidVersion { base: 5, current: 0 }));
    assert_eq!(manager.get_state(&key()).await.unwrap().version, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_resource_is_not_found() {
    let manager = SyncManager::new(MemoryStore::new(), EngineConfig::default());
    let error = manager
        .apply_operation(op(0, title("x"), 1), "client-1")
        .await
        .unwrap_err();
    assert!(matches!(error, Error::ResourceNotFound(_)));
    assert!(matches!(
        manager.get_version(ResourceType::Workflow, "wf-1").await,
        Err(Error::ResourceNotFound(_))
    ));
    assert_eq!(manager.active_locks(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_resource_keeps_existing_state() {
    let manager = memory_manager(json!({"title": "first"})).await;
    apply(&manager, op(0, title("edited"), 1)).await;

    let created = manager
        .initialize_resource(ResourceType::Workflow, "wf-1", json!({"title": "second"}), "user-2")
        .await
        .unwrap();
    assert!(!created);

    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.data, json!({"title": "edited"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_subscribers_do_not_block_delivery() {
    let manager = memory_manager(json!({"title": ""})).await;
    let received: Arc<Mutex<Vec<SyncEvent>>> = Arc::default();

    let _erroring = manager.subscribe("wf-1", |_| Err("connection reset".into()));
    let _panicking = manager.subscribe("wf-1", |_| panic!("subscriber bug"));
    let sink = Arc::clone(&received);
    let _healthy = manager.subscribe("wf-1", move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });

    let outcome = manager
        .apply_operation(op(0, title("t"), 1), "client-7")
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied { new_version: 1 });

    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].version(), 1);
    assert_eq!(events[0].originating_client_id, "client-7");
    assert_eq!(events[0].operation.operation.kind, title("t"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_operations_are_not_broadcast() {
    let manager = memory_manager(json!({"title": ""})).await;
    apply(&manager, op(0, title("B"), 200)).await;

    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let subscription = manager.subscribe("wf-1", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(!apply(&manager, op(0, title("A"), 100)).await.is_success());
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(subscription.unsubscribe());
}

#[tokio::test(flavor = "multi_thread")]
async fn last_unsubscribe_removes_resource_entry() {
    let manager = memory_manager(json!({})).await;
    let first = manager.subscribe("wf-1", |_| Ok(()));
    let second = manager.subscribe("wf-1", |_| Ok(()));
    assert_eq!(manager.broadcaster().subscriber_count("wf-1"), 2);

    assert!(first.unsubscribe());
    assert!(manager.broadcaster().has_resource("wf-1"));
    assert!(second.unsubscribe());
    assert!(!manager.broadcaster().has_resource("wf-1"));
    assert_eq!(manager.broadcaster().resource_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_releases_subscribers() {
    let manager = memory_manager(json!({})).await;
    let subscription = manager.subscribe("wf-1", |_| Ok(()));

    manager.shutdown();
    assert_eq!(manager.broadcaster().resource_count(), 0);
    assert!(!subscription.unsubscribe());

    // The store is untouched
    assert_eq!(
        manager.get_version(ResourceType::Workflow, "wf-1").await.unwrap(),
        0
    );
}

async fn edit_session(manager: &SyncManager<impl SyncStore>) {
    let steps = Path::root().key("steps");
    apply(manager, op(0, OperationKind::insert(steps.clone().end(), json!("fetch")), 1)).await;
    apply(manager, op(1, OperationKind::insert(steps.clone().index(0), json!("auth")), 2)).await;
    // Stale edits that get transformed
    apply(manager, op(1, OperationKind::insert(steps.clone().index(1), json!("parse")), 3)).await;
    apply(manager, op(1, title("Pipeline"), 4)).await;
    apply(
        manager,
        op(
            4,
            OperationKind::relocate(steps.clone().index(0), Path::root().key("setup")),
            5,
        ),
    )
    .await;
    apply(manager, op(5, OperationKind::delete(Path::root().key("draft")), 6)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_the_log_reproduces_the_document() {
    let manager = memory_manager(json!({"steps": [], "draft": true})).await;
    edit_session(&manager).await;

    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.version, 6);
    assert_eq!(
        state.data,
        json!({"steps": ["fetch", "parse"], "title": "Pipeline", "setup": "auth"})
    );
    assert_eq!(manager.replay(&key()).await.unwrap(), state.data);
    assert!(manager.verify(&key()).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn libsql_store_runs_the_same_pipeline() {
    let store = LibSqlStore::open_in_memory().await.unwrap();
    let manager = manager_with(store, EngineConfig::default(), json!({"steps": [], "draft": true})).await;
    edit_session(&manager).await;

    assert!(manager.verify(&key()).await.unwrap());
    let history = manager.get_operation_history(&key(), None).await.unwrap();
    let versions: Vec<u64> = history.iter().map(|entry| entry.version).collect();
    assert_eq!(versions, vec![6, 5, 4, 3, 2, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn history_defaults_to_configured_limit() {
    let config = EngineConfig {
        history_limit: 2,
        ..EngineConfig::default()
    };
    let manager = manager_with(MemoryStore::new(), config, json!({"n": 0})).await;
    for n in 0..4 {
        let kind = OperationKind::update(Path::root().key("n"), json!(n + 1));
        apply(&manager, op(n, kind, 1)).await;
    }

    assert_eq!(manager.get_operation_history(&key(), None).await.unwrap().len(), 2);
    assert_eq!(manager.get_operation_history(&key(), Some(10)).await.unwrap().len(), 4);

    let since: Vec<u64> = manager
        .operations_since(&key(), 2)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.version)
        .collect();
    assert_eq!(since, vec![3, 4]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_applies_are_serialized() {
    let store = LibSqlStore::open_in_memory().await.unwrap();
    let manager = manager_with(store, EngineConfig::default(), json!({"fields": {}})).await;
    let field = |name: &str| {
        op(
            0,
            OperationKind::update(Path::root().key("fields").key(name), json!(name)),
            1,
        )
    };

    let (a, b, c, d) = tokio::join!(
        manager.apply_operation(field("a"), "client-a"),
        manager.apply_operation(field("b"), "client-b"),
        manager.apply_operation(field("c"), "client-c"),
        manager.apply_operation(field("d"), "client-d"),
    );

    let mut versions: Vec<u64> = [a, b, c, d]
        .into_iter()
        .map(|outcome| outcome.unwrap().new_version().unwrap())
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2, 3, 4]);

    let state = manager.get_state(&key()).await.unwrap();
    assert_eq!(state.version, 4);
    assert_eq!(
        state.data["fields"].as_object().map(serde_json::Map::len),
        Some(4)
    );
    assert_eq!(manager.active_locks(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn version_cache_is_advisory_until_refreshed() {
    let store = MemoryStore::new();
    let writer = manager_with(store.clone(), EngineConfig::default(), json!({})).await;
    let reader = SyncManager::new(store, EngineConfig::default());

    assert_eq!(
        reader.get_version(ResourceType::Workflow, "wf-1").await.unwrap(),
        0
    );
    apply(&writer, op(0, title("x"), 1)).await;

    assert_eq!(
        reader.get_version(ResourceType::Workflow, "wf-1").await.unwrap(),
        0
    );
    assert_eq!(reader.refresh_version(&key()).await.unwrap(), 1);
    assert_eq!(
        reader.get_version(ResourceType::Workflow, "wf-1").await.unwrap(),
        1
    );
}

/// Store that lets another writer commit right before the first commit
/// attempt, as a second process sharing the database would
struct RacingStore {
    inner: MemoryStore,
    raced: AtomicBool,
}

impl RacingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            raced: AtomicBool::new(false),
        }
    }
}

impl VersionStore for RacingStore {
    async fn load_state(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
        self.inner.load_state(key).await
    }

    async fn create_state(&self, state: &ResourceState) -> Result<bool> {
        self.inner.create_state(state).await
    }
}

impl OperationLog for RacingStore {
    async fn operations_after(
        &self,
        key: &ResourceKey,
        version: u64,
    ) -> Result<Vec<CommittedOperation>> {
        self.inner.operations_after(key, version).await
    }

    async fn recent_operations(
        &self,
        key: &ResourceKey,
        limit: usize,
    ) -> Result<Vec<CommittedOperation>> {
        self.inner.recent_operations(key, limit).await
    }

    async fn initial_data(&self, key: &ResourceKey) -> Result<Option<Value>> {
        self.inner.initial_data(key).await
    }
}

impl SyncStore for RacingStore {
    async fn commit(
        &self,
        expected_version: u64,
        state: &ResourceState,
        entry: &CommittedOperation,
    ) -> Result<u64> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let current = self.inner.load_state(&state.key()).await?.unwrap();
            let kind = OperationKind::insert(items(0), json!("rival"));
            let rival = ResourceState {
                version: current.version + 1,
                data: crate::document::apply(&current.data, &kind),
                ..current.clone()
            };
            let rival_entry =
                CommittedOperation::new(op(current.version, kind, 1), current.version + 1);
            self.inner
                .commit(current.version, &rival, &rival_entry)
                .await?;
        }
        self.inner.commit(expected_version, state, entry).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_commit_race_is_retried_after_rebase() {
    let store = MemoryStore::new();
    let manager = manager_with(
        RacingStore::new(store.clone()),
        EngineConfig::default(),
        json!({"items": ["a"]}),
    )
    .await;

    let outcome = apply(&manager, op(0, OperationKind::insert(items(1), json!("mine")), 5)).await;
    assert_eq!(outcome, ApplyOutcome::Applied { new_version: 2 });

    let state = store.load_state(&key()).await.unwrap().unwrap();
    assert_eq!(state.data, json!({"items": ["rival", "a", "mine"]}));
    assert!(manager.verify(&key()).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_commit_race_without_retries_reports_mismatch() {
    let store = MemoryStore::new();
    let config = EngineConfig::default().with_max_commit_retries(0);
    let manager = manager_with(RacingStore::new(store.clone()), config, json!({"items": []})).await;

    let error = manager
        .apply_operation(op(0, title("x"), 5), "client-1")
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::VersionMismatch {
            expected: 0,
            actual: 1
        }
    ));
    assert!(error.is_retryable());

    // Only the rival commit landed; the cache was dropped and reloads from the store
    assert_eq!(store.operations_after(&key(), 0).await.unwrap().len(), 1);
    assert_eq!(
        manager.get_version(ResourceType::Workflow, "wf-1").await.unwrap(),
        1
    );
}
