//! Perspective detail cache with pending local mutations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::types::{EveesMutation, NewPerspective, PerspectiveDetails, Update};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedDetails {
    pub details: PerspectiveDetails,
    /// Depth the details were fetched with. `-1` means the whole sub-graph is
    /// known locally.
    pub levels: Option<i32>,
}

/// Storage behind a [`super::ClientCachedWithBase`].
///
/// Deleted perspectives are terminal: later creates and updates on the same
/// id are discarded.
pub trait ClientCache: Send + Sync {
    fn get_cached_perspective(&self, perspective_id: &str) -> Option<CachedDetails>;

    fn set_cached_perspective(&self, perspective_id: &str, details: CachedDetails);

    /// Evict read-cache state. Perspectives with pending local mutations are
    /// kept, as the local layer is still their source of truth.
    fn clear_cached_perspective(&self, perspective_id: &str);

    fn new_perspective(&self, new_perspective: NewPerspective);

    fn add_update(&self, update: Update);

    fn get_update(&self, perspective_id: &str) -> Option<Update>;

    fn deleted_perspective(&self, perspective_id: &str);

    fn is_deleted(&self, perspective_id: &str) -> bool;

    fn diff(&self) -> EveesMutation;

    /// Drop pending mutations. The read cache is retained.
    fn clear(&self);

    /// Drop the pending mutations in `flushed`. Entries that changed since
    /// `flushed` was taken stay pending.
    fn clear_flushed(&self, flushed: &EveesMutation);
}

#[derive(Default)]
struct CacheState {
    cached: HashMap<String, CachedDetails>,
    new_perspectives: BTreeMap<String, NewPerspective>,
    updates: BTreeMap<String, Update>,
    deleted: BTreeSet<String>,
}

impl CacheState {
    fn has_pending(&self, perspective_id: &str) -> bool {
        self.new_perspectives.contains_key(perspective_id) || self.updates.contains_key(perspective_id)
    }
}

#[derive(Default)]
pub struct CacheOnMemory {
    state: Mutex<CacheState>,
}

impl CacheOnMemory {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientCache for CacheOnMemory {
    fn get_cached_perspective(&self, perspective_id: &str) -> Option<CachedDetails> {
        self.lock().cached.get(perspective_id).cloned()
    }

    fn set_cached_perspective(&self, perspective_id: &str, details: CachedDetails) {
        let mut state = self.lock();
        if state.deleted.contains(perspective_id) {
            return;
        }
        state.cached.insert(perspective_id.to_owned(), details);
    }

    fn clear_cached_perspective(&self, perspective_id: &str) {
        let mut state = self.lock();
        if state.has_pending(perspective_id) {
            debug!(perspective_id, "keeping cached details with pending mutations");
            return;
        }
        state.cached.remove(perspective_id);
    }

    fn new_perspective(&self, new_perspective: NewPerspective) {
        let mut state = self.lock();
        let id = new_perspective.id().to_owned();
        if state.deleted.contains(&id) {
            debug!(perspective_id = %id, "discarding create of deleted perspective");
            return;
        }
        state.new_perspectives.insert(id, new_perspective);
    }

    fn add_update(&self, update: Update) {
        let mut state = self.lock();
        if state.deleted.contains(&update.perspective_id) {
            debug!(perspective_id = %update.perspective_id, "discarding update of deleted perspective");
            return;
        }
        match state.updates.get_mut(&update.perspective_id) {
            Some(pending) => pending.absorb(update),
            None => {
                state.updates.insert(update.perspective_id.clone(), update);
            }
        }
    }

    fn get_update(&self, perspective_id: &str) -> Option<Update> {
        self.lock().updates.get(perspective_id).cloned()
    }

    fn deleted_perspective(&self, perspective_id: &str) {
        let mut state = self.lock();
        state.new_perspectives.remove(perspective_id);
        state.updates.remove(perspective_id);
        state.cached.remove(perspective_id);
        state.deleted.insert(perspective_id.to_owned());
    }

    fn is_deleted(&self, perspective_id: &str) -> bool {
        self.lock().deleted.contains(perspective_id)
    }

    fn diff(&self) -> EveesMutation {
        let state = self.lock();
        EveesMutation {
            entities: Vec::new(),
            new_perspectives: state.new_perspectives.values().cloned().collect(),
            updates: state.updates.values().cloned().collect(),
            deleted_perspectives: state.deleted.iter().cloned().collect(),
        }
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.new_perspectives.clear();
        state.updates.clear();
        state.deleted.clear();
    }

    fn clear_flushed(&self, flushed: &EveesMutation) {
        let mut state = self.lock();
        for new_perspective in &flushed.new_perspectives {
            let id = new_perspective.id();
            if state.new_perspectives.get(id) == Some(new_perspective) {
                state.new_perspectives.remove(id);
            }
        }
        for update in &flushed.updates {
            if state.updates.get(&update.perspective_id) == Some(update) {
                state.updates.remove(&update.perspective_id);
            }
        }
        for perspective_id in &flushed.deleted_perspectives {
            state.deleted.remove(perspective_id);
        }
    }
}
