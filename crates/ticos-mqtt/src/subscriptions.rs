//! Attribute-change subscription registry.
//!
//! Subscriptions are stored in registration order and matched against each
//! inbound [`AttributeUpdate`] by device scope and key filter. Callbacks run
//! on the dispatch task and must return quickly; slow work belongs on a
//! channel or a spawned task.
//!
//! Each message is delivered to the callbacks that matched when it arrived.
//! A callback that unsubscribes another (or itself) does not stop delivery
//! of the current message: the removed callback still fires for it, and
//! stays silent from the next message on.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use ticos_protocol::AttributeUpdate;

use crate::lock;

/// Callback invoked with the (possibly narrowed) update.
pub type AttributeCallback = Arc<dyn Fn(&AttributeUpdate) + Send + Sync>;

/// Identifies a subscription. Never reused within a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which device's updates a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceScope {
    /// The connected device itself.
    Own,
    /// One gateway sub-device.
    Device(String),
    /// Every gateway sub-device.
    AnyDevice,
}

impl DeviceScope {
    fn matches(&self, device: Option<&str>) -> bool {
        match (self, device) {
            (DeviceScope::Own, None) => true,
            (DeviceScope::Device(name), Some(device)) => name == device,
            (DeviceScope::AnyDevice, Some(_)) => true,
            _ => false,
        }
    }
}

/// Which keys of an update a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    Key(String),
    AnyKey,
}

struct Entry {
    scope: DeviceScope,
    filter: KeyFilter,
    callback: AttributeCallback,
}

struct RegistryState {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Entry>,
}

/// Ordered set of attribute subscriptions.
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }

    pub fn subscribe(
        &self,
        scope: DeviceScope,
        filter: KeyFilter,
        callback: AttributeCallback,
    ) -> SubscriptionId {
        let mut state = lock(&self.state);
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        tracing::debug!(subscription_id = %id, ?scope, ?filter, "attribute subscription added");
        state.entries.insert(
            id,
            Entry {
                scope,
                filter,
                callback,
            },
        );
        id
    }

    /// Remove a subscription. Unknown ids are not an error: the call
    /// returns `false` and leaves the registry unchanged.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.state).entries.remove(&id).is_some();
        if !removed {
            tracing::debug!(subscription_id = %id, "unsubscribe for unknown subscription");
        }
        removed
    }

    /// Drop every subscription. The id counter keeps running.
    pub fn clear(&self) -> usize {
        let mut state = lock(&self.state);
        let count = state.entries.len();
        state.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }

    /// Callbacks matching `update`, in registration order, each paired with
    /// the payload it should receive.
    fn matching(&self, update: &AttributeUpdate) -> Vec<(SubscriptionId, AttributeCallback, AttributeUpdate)> {
        let state = lock(&self.state);
        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.scope.matches(update.device.as_deref()))
            .filter_map(|(id, entry)| {
                let payload = match &entry.filter {
                    KeyFilter::AnyKey => update.clone(),
                    KeyFilter::Key(key) => update.narrowed(key)?,
                };
                Some((*id, Arc::clone(&entry.callback), payload))
            })
            .collect()
    }

    /// Invoke every matching callback. Returns how many fired.
    ///
    /// The registry lock is released before callbacks run, so a callback
    /// may subscribe or unsubscribe. A panicking callback is logged and
    /// does not stop the remaining ones.
    pub fn dispatch(&self, update: &AttributeUpdate) -> usize {
        let matched = self.matching(update);
        let count = matched.len();
        for (id, callback, payload) in matched {
            if catch_unwind(AssertUnwindSafe(|| callback(&payload))).is_err() {
                tracing::error!(subscription_id = %id, "attribute callback panicked");
            }
        }
        count
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
