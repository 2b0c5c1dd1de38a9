//! In-memory CAS layer over an optional base store.
//!
//! Reads check memory first, then the base, caching what the base returns.
//! Writes are held until [`CasStore::flush`], which pushes every held entity
//! to the base in a single `store_entities` call and then flushes the base.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::hash::CidConfig;
use super::store::{CasStore, CasTarget};
use super::{Entity, EntityCreate};
use crate::error::{EveesError, Result};

#[derive(Default)]
struct MemoryState {
    cached: HashMap<String, Entity>,
    /// Held writes keyed by (target cas, id), so the same object cloned to a
    /// second store is kept as a separate write.
    pending: BTreeMap<(Option<String>, String), Entity>,
}

pub struct CasOnMemory {
    base: Option<Arc<dyn CasStore>>,
    config: CidConfig,
    state: Mutex<MemoryState>,
}

impl CasOnMemory {
    /// A terminal store with no base. Flushing only promotes held writes into
    /// the read cache.
    #[must_use]
    pub fn new(config: CidConfig) -> Self {
        Self {
            base: None,
            config,
            state: Mutex::new(MemoryState::default()),
        }
    }

    #[must_use]
    pub fn with_base(base: Arc<dyn CasStore>) -> Self {
        Self {
            base: Some(base),
            config: CidConfig::default(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of held, unflushed writes.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, id: &str) -> Option<Entity> {
        let state = self.lock();
        state.cached.get(id).cloned().or_else(|| {
            state
                .pending
                .iter()
                .find(|((_, pending_id), _)| pending_id == id)
                .map(|(_, entity)| entity.clone())
        })
    }
}

#[async_trait]
impl CasStore for CasOnMemory {
    fn target(&self, draft: &EntityCreate) -> Result<CasTarget> {
        match &self.base {
            Some(base) => base.target(draft),
            None => Ok(CasTarget {
                cas_id: draft.cas_id.clone(),
                config: self.config,
            }),
        }
    }

    async fn store_entities(&self, drafts: &[EntityCreate]) -> Result<Vec<Entity>> {
        let entities = self.hash_entities(drafts).await?;
        let mut state = self.lock();
        for entity in &entities {
            state
                .pending
                .entry((entity.cas_id.clone(), entity.id.clone()))
                .or_insert_with(|| entity.clone());
        }
        debug!(count = entities.len(), held = state.pending.len(), "held entities in memory");
        Ok(entities)
    }

    async fn cache_entities(&self, entities: &[Entity]) -> Result<()> {
        let mut state = self.lock();
        for entity in entities {
            state.cached.insert(entity.id.clone(), entity.clone());
        }
        Ok(())
    }

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let mut found: HashMap<String, Entity> = HashMap::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.lookup(id) {
                Some(entity) => {
                    found.insert(id.clone(), entity);
                }
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            let Some(base) = &self.base else {
                return Err(EveesError::not_found("entity", missing.swap_remove(0)));
            };
            debug!(count = missing.len(), "cache miss, reading from base store");
            let fetched = base.get_entities(&missing).await?;
            self.cache_entities(&fetched).await?;
            for entity in fetched {
                found.insert(entity.id.clone(), entity);
            }
        }

        ids.iter()
            .map(|id| {
                found
                    .get(id)
                    .cloned()
                    .ok_or_else(|| EveesError::not_found("entity", id.clone()))
            })
            .collect()
    }

    async fn flush(&self) -> Result<()> {
        let held: Vec<Entity> = self.lock().pending.values().cloned().collect();
        if held.is_empty() {
            return Ok(());
        }

        if let Some(base) = &self.base {
            let drafts: Vec<EntityCreate> = held.iter().map(EntityCreate::from).collect();
            base.store_entities(&drafts).await?;
            base.flush().await?;
        }

        let mut state = self.lock();
        for entity in held {
            state.pending.remove(&(entity.cas_id.clone(), entity.id.clone()));
            state.cached.insert(entity.id.clone(), entity);
        }
        info!(remaining = state.pending.len(), "flushed memory store");
        Ok(())
    }

    async fn diff(&self) -> Result<Vec<Entity>> {
        Ok(self.lock().pending.values().cloned().collect())
    }
}
