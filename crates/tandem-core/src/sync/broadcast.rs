//! Per-resource subscriber registry

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::models::SyncEvent;

/// Error a subscriber callback may return; logged and swallowed
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn(&SyncEvent) -> Result<(), SubscriberError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    resources: Mutex<HashMap<String, BTreeMap<u64, Callback>>>,
    next_subscriber_id: AtomicU64,
}

impl Registry {
    fn resources(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<u64, Callback>>> {
        // Callbacks never run under this lock, so a poisoned map is still consistent
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, resource_id: &str, subscriber_id: u64) -> bool {
        let mut resources = self.resources();
        let Some(subscribers) = resources.get_mut(resource_id) else {
            return false;
        };
        let removed = subscribers.remove(&subscriber_id).is_some();
        if subscribers.is_empty() {
            resources.remove(resource_id);
        }
        removed
    }
}

/// Delivers commit events to the callbacks registered for a resource
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("resource_count", &self.resource_count())
            .finish()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events on `resource_id`
    pub fn subscribe<F>(&self, resource_id: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let resource_id = resource_id.into();
        let subscriber_id = self
            .registry
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);

        self.registry
            .resources()
            .entry(resource_id.clone())
            .or_default()
            .insert(subscriber_id, Arc::new(callback));

        tracing::debug!("Subscriber {} registered for {}", subscriber_id, resource_id);

        Subscription {
            resource_id,
            subscriber_id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every current subscriber of `resource_id`.
    ///
    /// Returns how many subscribers accepted the event. A subscriber that
    /// errors or panics is logged and skipped.
    pub fn publish(&self, resource_id: &str, event: &SyncEvent) -> usize {
        let snapshot: Vec<(u64, Callback)> = match self.registry.resources().get(resource_id) {
            Some(subscribers) => subscribers
                .iter()
                .map(|(id, callback)| (*id, Arc::clone(callback)))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (subscriber_id, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => {
                    tracing::warn!(
                        "Subscriber {} for {} failed on version {}: {}",
                        subscriber_id,
                        resource_id,
                        event.version(),
                        error
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Subscriber {} for {} panicked on version {}",
                        subscriber_id,
                        resource_id,
                        event.version()
                    );
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, resource_id: &str) -> usize {
        self.registry
            .resources()
            .get(resource_id)
            .map_or(0, BTreeMap::len)
    }

    pub fn has_resource(&self, resource_id: &str) -> bool {
        self.registry.resources().contains_key(resource_id)
    }

    pub fn resource_count(&self) -> usize {
        self.registry.resources().len()
    }

    /// Drop every subscriber
    pub fn clear(&self) {
        self.registry.resources().clear();
    }
}

/// Handle returned by [`Broadcaster::subscribe`].
///
/// Dropping the handle leaves the callback registered.
#[must_use = "call unsubscribe() to remove the callback"]
#[derive(Debug)]
pub struct Subscription {
    resource_id: String,
    subscriber_id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub const fn id(&self) -> u64 {
        self.subscriber_id
    }

    /// Remove the callback. Returns `false` if it was already gone (for
    /// example after the broadcaster was cleared).
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.remove(&self.resource_id, self.subscriber_id);
        if removed {
            tracing::debug!(
                "Subscriber {} unregistered from {}",
                self.subscriber_id,
                self.resource_id
            );
        }
        removed
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("next_subscriber_id", &self.next_subscriber_id)
            .finish_non_exhaustive()
    }
}
