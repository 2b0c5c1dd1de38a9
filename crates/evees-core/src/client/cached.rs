use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::cache::{CacheOnMemory, CachedDetails, ClientCache};
use super::events::{ClientEvents, SubscriptionId};
use super::Client;
use crate::cas::{CasStore, EntityCreate};
use crate::error::{EveesError, Result};
use crate::types::{
    EveesMutation, EveesMutationCreate, GetPerspectiveOptions, NewPerspective,
    PerspectiveDetails, PerspectiveGetResult, Update,
};

/// A client layer that caches perspective details and holds local
/// mutations until they are flushed into `base`.
///
/// Without a base the layer is a root: unknown perspectives read as empty
/// details and `flush` fails.
pub struct ClientCachedWithBase<C: ClientCache = CacheOnMemory> {
    name: String,
    store: Arc<dyn CasStore>,
    base: Option<Arc<dyn Client>>,
    cache: Arc<C>,
    cache_enabled: bool,
    events: Arc<ClientEvents>,
    subscription: Option<SubscriptionId>,
}

impl ClientCachedWithBase<CacheOnMemory> {
    pub fn on_memory(
        name: impl Into<String>,
        store: Arc<dyn CasStore>,
        base: Option<Arc<dyn Client>>,
    ) -> Self {
        Self::new(name, store, base, CacheOnMemory::default())
    }
}

impl<C: ClientCache + 'static> ClientCachedWithBase<C> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn CasStore>,
        base: Option<Arc<dyn Client>>,
        cache: C,
    ) -> Self {
        let name = name.into();
        let cache = Arc::new(cache);
        let events = Arc::new(ClientEvents::default());

        let subscription = base.as_ref().map(|base| {
            let cache = Arc::downgrade(&cache);
            let events = Arc::downgrade(&events);
            let layer = name.clone();
            base.events().subscribe(move |ids| {
                let (Some(cache), Some(events)) = (cache.upgrade(), events.upgrade()) else {
                    return;
                };
                for id in ids {
                    cache.clear_cached_perspective(id);
                }
                debug!(client = %layer, count = ids.len(), "base updated, evicted cached perspectives");
                events.emit_updated(ids);
            })
        });

        Self {
            name,
            store,
            base,
            cache,
            cache_enabled: true,
            events,
            subscription,
        }
    }
}

impl<C: ClientCache> ClientCachedWithBase<C> {
    #[must_use]
    pub const fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn base(&self) -> Option<&Arc<dyn Client>> {
        self.base.as_ref()
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn create_perspectives(&self, new_perspectives: Vec<NewPerspective>) -> Result<()> {
        for new_perspective in new_perspectives {
            let id = new_perspective.id().to_owned();
            if self.cache.is_deleted(&id) {
                warn!(client = %self.name, perspective_id = %id, "ignoring create of deleted perspective");
                continue;
            }

            let payload = new_perspective.perspective.payload();
            let draft = EntityCreate::from_object(&new_perspective.perspective.object)?
                .on_remote(payload.remote.clone());
            let stored = self.store.store_entity(&draft).await?;
            if stored.id != id {
                return Err(EveesError::HashMismatch {
                    claimed: id,
                    computed: stored.id,
                });
            }

            let details = PerspectiveDetails {
                head_id: new_perspective.update.details.head_id.clone(),
                guardian_id: new_perspective.update.details.guardian_id.clone(),
                can_update: Some(true),
            };
            self.cache.new_perspective(new_perspective);
            self.cache.set_cached_perspective(
                &id,
                CachedDetails {
                    details,
                    levels: Some(-1),
                },
            );
        }
        Ok(())
    }

    async fn update_perspectives(&self, updates: Vec<Update>) -> Result<()> {
        let mut updated = Vec::with_capacity(updates.len());
        for update in updates {
            let id = update.perspective_id.clone();
            if self.cache.is_deleted(&id) {
                warn!(client = %self.name, perspective_id = %id, "ignoring update of deleted perspective");
                continue;
            }

            let mut cached = match self.cache.get_cached_perspective(&id) {
                Some(cached) => cached,
                None => {
                    let current = match &self.base {
                        Some(base) => base.get_perspective(&id, GetPerspectiveOptions::levels(0)).await?,
                        None => PerspectiveGetResult::default(),
                    };
                    CachedDetails {
                        details: current.details,
                        levels: Some(0),
                    }
                }
            };
            cached.details.overlay(&update.details);

            self.cache.add_update(update);
            self.cache.set_cached_perspective(&id, cached);
            updated.push(id);
        }

        self.events.emit_updated(&updated);
        Ok(())
    }
}

impl<C: ClientCache> Drop for ClientCachedWithBase<C> {
    fn drop(&mut self) {
        if let (Some(base), Some(id)) = (&self.base, self.subscription) {
            base.events().unsubscribe(id);
        }
    }
}

#[async_trait]
impl<C: ClientCache + 'static> Client for ClientCachedWithBase<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&self) -> Arc<dyn CasStore> {
        self.store.clone()
    }

    fn events(&self) -> Arc<ClientEvents> {
        self.events.clone()
    }

    async fn get_perspective(
        &self,
        perspective_id: &str,
        options: GetPerspectiveOptions,
    ) -> Result<PerspectiveGetResult> {
        if let Some(cached) = self.cache.get_cached_perspective(perspective_id) {
            let valid = !self.cache_enabled
                || options.levels.is_none()
                || cached.levels == options.levels
                || cached.levels == Some(-1);
            if valid {
                debug!(client = %self.name, perspective_id, "perspective cache hit");
                return Ok(PerspectiveGetResult {
                    details: cached.details,
                    slice: None,
                });
            }
        }

        let Some(base) = &self.base else {
            return Ok(PerspectiveGetResult::default());
        };

        debug!(client = %self.name, perspective_id, levels = ?options.levels, "perspective cache miss");
        let mut result = base.get_perspective(perspective_id, options).await?;

        // local pending writes win over what the base knows
        if let Some(pending) = self.cache.get_update(perspective_id) {
            result.details.overlay(&pending.details);
        }

        if self.cache_enabled {
            self.cache.set_cached_perspective(
                perspective_id,
                CachedDetails {
                    details: result.details.clone(),
                    levels: options.levels,
                },
            );

            if let Some(slice) = result.slice.take() {
                self.store.cache_entities(&slice.entities).await?;
                for perspective in slice.perspectives {
                    if self.cache.get_update(&perspective.id).is_some() {
                        continue;
                    }
                    self.cache.set_cached_perspective(
                        &perspective.id,
                        CachedDetails {
                            details: perspective.details,
                            levels: options.levels,
                        },
                    );
                }
            }
        }

        Ok(PerspectiveGetResult {
            details: result.details,
            slice: None,
        })
    }

    async fn update(&self, mutation: EveesMutationCreate) -> Result<()> {
        let EveesMutationCreate {
            entities,
            new_perspectives,
            updates,
            deleted_perspectives,
        } = mutation;

        if !entities.is_empty() {
            self.store.store_entities(&entities).await?;
        }
        if !new_perspectives.is_empty() {
            self.create_perspectives(new_perspectives).await?;
        }
        if !updates.is_empty() {
            self.update_perspectives(updates).await?;
        }
        for perspective_id in deleted_perspectives {
            self.cache.deleted_perspective(&perspective_id);
        }
        Ok(())
    }

    async fn can_update(&self, perspective_id: &str, user_id: Option<&str>) -> Result<bool> {
        if self.cache.is_deleted(perspective_id) {
            return Ok(false);
        }
        if user_id.is_none() {
            if let Some(flag) = self
                .cache
                .get_cached_perspective(perspective_id)
                .and_then(|cached| cached.details.can_update)
            {
                return Ok(flag);
            }
        }
        Ok(true)
    }

    async fn flush(&self) -> Result<()> {
        let Some(base) = &self.base else {
            return Err(EveesError::Precondition("base not defined".into()));
        };

        self.store.flush().await?;

        let mutation = self.cache.diff();
        let pushed = mutation.new_perspectives.len() + mutation.updates.len() + mutation.deleted_perspectives.len();
        if !mutation.is_empty() {
            base.update(mutation.clone().into()).await?;
        }
        base.flush().await?;
        // updates recorded while the base was busy go out with the next flush
        self.cache.clear_flushed(&mutation);

        info!(client = %self.name, pushed, "flushed client");
        Ok(())
    }

    async fn diff(&self) -> Result<EveesMutation> {
        let mut mutation = self.cache.diff();
        mutation.entities = self.store.diff().await?;
        Ok(mutation)
    }

    async fn clear(&self) -> Result<()> {
        self.cache.clear();
        Ok(())
    }

    async fn get_user_perspectives(&self, perspective_id: &str) -> Result<Vec<String>> {
        match &self.base {
            Some(base) => base.get_user_perspectives(perspective_id).await,
            None => Ok(Vec::new()),
        }
    }
}
