//! Operation sync: transformation, the apply pipeline and commit broadcast

mod broadcast;
mod manager;
mod transform;

#[cfg(test)]
mod tests;

pub use broadcast::{Broadcaster, SubscriberError, Subscription};
pub use manager::SyncManager;
pub use transform::{TransformOutcome, Transformer};
