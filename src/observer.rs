//! Registry-changed notifications.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use uuid::Uuid;

/// A change to the set of known devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    GatewayAdded(SocketAddr),
    BulbAdded { label: String, gateway: SocketAddr },
    Purged,
}

pub type RegistryCallback = Arc<dyn Fn(&RegistryEvent) + Send + Sync + 'static>;

/// Set of callbacks interested in registry changes.
///
/// Callbacks run on whichever task published the event, after the change is
/// visible in the registry.
#[derive(Clone, Default)]
pub struct Observers {
    subscriptions: Arc<Mutex<HashMap<Uuid, RegistryCallback>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RegistryCallback>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, callback: F) -> Uuid
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.lock().insert(id, Arc::new(callback));
        id
    }

    /// Returns `true` if `id` was subscribed.
    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn publish(&self, event: RegistryEvent) {
        // call outside the lock so a callback may (un)subscribe
        let callbacks = self.lock().values().cloned().collect::<Vec<_>>();
        debug!("Publishing {:?} to {} observer(s)", event, callbacks.len());
        for callback in callbacks {
            callback(&event);
        }
    }
}
