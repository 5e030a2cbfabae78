//! Data models for Tandem

mod event;
mod operation;
mod path;
mod resource;

pub use event::{ApplyOutcome, SyncEvent};
pub use operation::{CommittedOperation, Operation, OperationId, OperationKind};
pub use path::{Path, PathSegment};
pub use resource::{ResourceKey, ResourceState, ResourceType};
