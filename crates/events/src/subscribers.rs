use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

/// An event with a discriminant handlers can subscribe to.
pub trait Event: fmt::Debug + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

pub type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Slot<E: Event> {
    id: SubscriptionId,
    /// `None` receives every kind.
    kind: Option<E::Kind>,
    handler: Handler<E>,
}

/// Per-engine handler registry.
///
/// Handlers run synchronously on the receive loop, in registration order.
/// The list is copied before emission, so handlers may subscribe or
/// unsubscribe (themselves included) while being called.
pub struct Subscribers<E: Event> {
    slots: RwLock<Vec<Slot<E>>>,
}

impl<E: Event> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }
}

impl<E: Event> Subscribers<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(handler))
    }

    fn insert(&self, kind: Option<E::Kind>, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.slots.write().push(Slot { id, kind, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Calls every matching handler; returns how many failed.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let handlers: Vec<(SubscriptionId, Handler<E>)> = self
            .slots
            .read()
            .iter()
            .filter(|slot| slot.kind.map_or(true, |k| k == kind))
            .map(|slot| (slot.id, Arc::clone(&slot.handler)))
            .collect();

        let mut failures = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::warn!(subscription = %id, ?kind, error = %err, "event handler failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(subscription = %id, ?kind, "event handler panicked");
                }
            }
        }
        failures
    }
}

impl<E: Event> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}
