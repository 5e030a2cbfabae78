//! tandem-core - Core library for Tandem
//!
//! Keeps versioned JSON resources (workflows, conversations, tasks) in sync
//! between concurrent editors. Clients submit addressed operations against the
//! version they last saw; stale operations are transformed past newer commits
//! or rejected, committed atomically with the operation log, and broadcast to
//! subscribers.

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;

pub use config::{ConflictPolicy, EngineConfig};
pub use db::LibSqlStore;
pub use error::{Error, Result};
pub use models::{
    ApplyOutcome, CommittedOperation, Operation, OperationId, OperationKind, Path, PathSegment,
    ResourceKey, ResourceState, ResourceType, SyncEvent,
};
pub use store::MemoryStore;
pub use sync::{SyncManager, Subscription};
