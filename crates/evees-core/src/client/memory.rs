use std::sync::Arc;

use async_trait::async_trait;

use super::cache::ClientCache;
use super::cached::ClientCachedWithBase;
use super::events::ClientEvents;
use super::Client;
use crate::cas::{CasOnMemory, CasStore};
use crate::error::Result;
use crate::types::{
    EveesMutation, EveesMutationCreate, GetPerspectiveOptions, PerspectiveGetResult,
};

/// Throw-away workspace client.
///
/// Entities and perspective changes are held in memory on top of `base`
/// until flushed. Reads never re-fetch a perspective the workspace already
/// knows, whatever depth is requested.
pub struct ClientOnMemory {
    inner: ClientCachedWithBase,
    memory: Arc<CasOnMemory>,
}

impl ClientOnMemory {
    pub fn new(name: impl Into<String>, base: Arc<dyn Client>) -> Self {
        let memory = Arc::new(CasOnMemory::with_base(base.store()));
        let store: Arc<dyn CasStore> = memory.clone();
        Self {
            inner: ClientCachedWithBase::on_memory(name, store, Some(base)),
            memory,
        }
    }

    /// A workspace seeded with `mutation`.
    pub async fn with_mutation(
        name: impl Into<String>,
        base: Arc<dyn Client>,
        mutation: EveesMutation,
    ) -> Result<Self> {
        let client = Self::new(name, base);
        if !mutation.is_empty() {
            client.inner.update(mutation.into()).await?;
        }
        Ok(client)
    }

    pub fn memory_store(&self) -> &CasOnMemory {
        &self.memory
    }
}

#[async_trait]
impl Client for ClientOnMemory {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn store(&self) -> Arc<dyn CasStore> {
        self.inner.store()
    }

    fn events(&self) -> Arc<ClientEvents> {
        self.inner.events()
    }

    async fn get_perspective(
        &self,
        perspective_id: &str,
        options: GetPerspectiveOptions,
    ) -> Result<PerspectiveGetResult> {
        if let Some(cached) = self.inner.cache().get_cached_perspective(perspective_id) {
            return Ok(PerspectiveGetResult {
                details: cached.details,
                slice: None,
            });
        }
        self.inner.get_perspective(perspective_id, options).await
    }

    async fn update(&self, mutation: EveesMutationCreate) -> Result<()> {
        self.inner.update(mutation).await
    }

    async fn can_update(&self, perspective_id: &str, user_id: Option<&str>) -> Result<bool> {
        let known = self
            .inner
            .cache()
            .get_cached_perspective(perspective_id)
            .and_then(|cached| cached.details.can_update);
        match (known, self.inner.base()) {
            (Some(flag), _) if user_id.is_none() => Ok(flag),
            (_, Some(base)) => base.can_update(perspective_id, user_id).await,
            _ => self.inner.can_update(perspective_id, user_id).await,
        }
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    async fn diff(&self) -> Result<EveesMutation> {
        self.inner.diff().await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn get_user_perspectives(&self, perspective_id: &str) -> Result<Vec<String>> {
        self.inner.get_user_perspectives(perspective_id).await
    }
}
