//! Live-subscriber bookkeeping for one stream controller.
//!
//! The registry is only ever mutated through its owning controller's
//! subscribe/unsubscribe paths; the read loop takes copy-on-read snapshots,
//! so a fan-out in progress never blocks a subscriber joining or leaving.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::StreamEvent;

/// One live subscriber: its keyword list, the producer side of its bounded
/// delivery queue, and a count of events dropped because that queue was full.
#[derive(Clone)]
pub(crate) struct SubscriberEntry {
    pub id: Uuid,
    pub keywords: Vec<String>,
    pub tx: mpsc::Sender<Arc<StreamEvent>>,
    pub dropped: Arc<AtomicU64>,
}

#[derive(Default)]
pub(crate) struct Registry {
    inner: RwLock<HashMap<Uuid, SubscriberEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: SubscriberEntry) {
        self.inner.write().unwrap().insert(entry.id, entry);
    }

    /// Remove `id` if present; removing an unknown id is a no-op.
    /// Returns whether the registry is now empty.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write().unwrap();
        inner.remove(&id);
        inner.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// A consistent copy of all entries for one fan-out pass.
    pub fn snapshot(&self) -> Vec<SubscriberEntry> {
        self.inner.read().unwrap().values().cloned().collect()
    }

    /// The sorted, deduplicated union of every subscriber's keywords — the
    /// value the upstream `track` parameter is derived from.
    pub fn current_keywords(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .values()
            .flat_map(|entry| entry.keywords.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
