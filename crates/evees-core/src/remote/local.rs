//! In-memory reference remote.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::defaults::snap_default_perspective;
use super::{AccessControl, RemoteEvees};
use crate::cas::{CasStore, EntityCreate, Secured};
use crate::client::{Client, ClientEvents};
use crate::error::{EveesError, Result};
use crate::types::{
    EveesMutation, EveesMutationCreate, GetPerspectiveOptions, PartialPerspective, Perspective,
    PerspectiveDetails, PerspectiveGetResult,
};

async fn read_perspective(store: &dyn CasStore, perspective_id: &str) -> Result<Perspective> {
    let entity: Secured<Perspective> = store.get_entity(perspective_id).await?.decode()?;
    Ok(entity.object.payload)
}

/// Everyone may update. Owners are perspective creators.
pub struct LocalAccessControl {
    store: Arc<dyn CasStore>,
}

#[async_trait]
impl AccessControl for LocalAccessControl {
    async fn can_update(&self, _perspective_id: &str, _user_id: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    async fn get_owner(&self, perspective_id: &str) -> Result<Option<String>> {
        let perspective = read_perspective(self.store.as_ref(), perspective_id).await?;
        Ok(Some(perspective.creator_id))
    }
}

/// Authoritative, process-local remote.
///
/// Writes are applied immediately, so `flush` has nothing to do.
pub struct RemoteLocal {
    id: String,
    cas_id: String,
    user_id: Option<String>,
    store: Arc<dyn CasStore>,
    access: LocalAccessControl,
    perspectives: Mutex<HashMap<String, PerspectiveDetails>>,
    events: Arc<ClientEvents>,
    update_calls: AtomicUsize,
}

impl RemoteLocal {
    pub fn new(
        id: impl Into<String>,
        cas_id: impl Into<String>,
        user_id: Option<String>,
        store: Arc<dyn CasStore>,
    ) -> Self {
        Self {
            id: id.into(),
            cas_id: cas_id.into(),
            user_id,
            access: LocalAccessControl {
                store: store.clone(),
            },
            store,
            perspectives: Mutex::new(HashMap::new()),
            events: Arc::new(ClientEvents::default()),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `update` round trips served so far.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PerspectiveDetails>> {
        self.perspectives.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Client for RemoteLocal {
    fn name(&self) -> &str {
        &self.id
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
        _options: GetPerspectiveOptions,
    ) -> Result<PerspectiveGetResult> {
        let details = self.lock().get(perspective_id).cloned().unwrap_or_default();
        let can_update = self
            .access
            .can_update(perspective_id, self.user_id.as_deref())
            .await?;
        Ok(PerspectiveGetResult {
            details: PerspectiveDetails {
                can_update: Some(can_update),
                ..details
            },
            slice: None,
        })
    }

    async fn update(&self, mutation: EveesMutationCreate) -> Result<()> {
        if let Some(user_id) = &self.user_id {
            if let Some(foreign) = mutation
                .new_perspectives
                .iter()
                .find(|np| np.perspective.payload().creator_id != *user_id)
            {
                return Err(EveesError::Precondition(format!(
                    "cannot create perspective {} for creator {} as {user_id}",
                    foreign.id(),
                    foreign.perspective.payload().creator_id
                )));
            }
        }
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        if !mutation.entities.is_empty() {
            self.store.store_entities(&mutation.entities).await?;
        }

        for new_perspective in &mutation.new_perspectives {
            let draft = EntityCreate::from_object(&new_perspective.perspective.object)?.on_remote(&self.id);
            self.store.store_entity(&draft).await?;
        }

        let updated: Vec<String> = {
            let mut perspectives = self.lock();
            for new_perspective in &mutation.new_perspectives {
                perspectives.insert(
                    new_perspective.id().to_owned(),
                    PerspectiveDetails {
                        can_update: None,
                        ..new_perspective.update.details.clone()
                    },
                );
            }
            for update in &mutation.updates {
                perspectives
                    .entry(update.perspective_id.clone())
                    .or_default()
                    .overlay(&update.details);
            }
            for deleted in &mutation.deleted_perspectives {
                perspectives.remove(deleted);
            }
            mutation.updates.iter().map(|u| u.perspective_id.clone()).collect()
        };

        debug!(
            remote = %self.id,
            created = mutation.new_perspectives.len(),
            updated = updated.len(),
            deleted = mutation.deleted_perspectives.len(),
            "applied mutation"
        );
        self.events.emit_updated(&updated);
        Ok(())
    }

    async fn can_update(&self, perspective_id: &str, user_id: Option<&str>) -> Result<bool> {
        let user_id = user_id.map(str::to_owned).or_else(|| self.user_id.clone());
        self.access.can_update(perspective_id, user_id.as_deref()).await
    }

    async fn flush(&self) -> Result<()> {
        info!(remote = %self.id, "flush on authoritative remote is a no-op");
        Ok(())
    }

    async fn diff(&self) -> Result<EveesMutation> {
        Ok(EveesMutation::default())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn get_user_perspectives(&self, perspective_id: &str) -> Result<Vec<String>> {
        let Some(user_id) = self.user_id.clone() else {
            return Ok(Vec::new());
        };
        let context = read_perspective(self.store.as_ref(), perspective_id).await?.context;

        let mut known: Vec<String> = self.lock().keys().cloned().collect();
        known.sort();

        let mut found = Vec::new();
        for id in known {
            let perspective = read_perspective(self.store.as_ref(), &id).await?;
            if perspective.context == context && perspective.creator_id == user_id {
                found.push(id);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl RemoteEvees for RemoteLocal {
    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn cas_id(&self) -> &str {
        &self.cas_id
    }

    fn access_control(&self) -> &dyn AccessControl {
        &self.access
    }

    async fn snap_perspective(
        &self,
        partial: PartialPerspective,
        _guardian_id: Option<&str>,
    ) -> Result<Secured<Perspective>> {
        snap_default_perspective(self, partial).await
    }
}
