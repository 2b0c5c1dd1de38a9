//! Remote-backed [`CasStore`] that routes drafts to [`CasRemote`]s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::hash::validate_entities;
use super::signed::{Signer, as_signed};
use super::store::{CasRemote, CasStore, CasTarget};
use super::{Entity, EntityCreate};
use crate::error::{EveesError, Result};

pub struct CasRouter {
    stores: Vec<Arc<dyn CasRemote>>,
    remote_to_cas: HashMap<String, String>,
    verifier: Option<Arc<dyn Signer>>,
}

impl CasRouter {
    pub fn new(stores: Vec<Arc<dyn CasRemote>>) -> Self {
        Self {
            stores,
            remote_to_cas: HashMap::new(),
            verifier: None,
        }
    }

    /// Route drafts created for evees remote `remote_id` to `cas_id`.
    #[must_use]
    pub fn route_remote(mut self, remote_id: impl Into<String>, cas_id: impl Into<String>) -> Self {
        self.remote_to_cas.insert(remote_id.into(), cas_id.into());
        self
    }

    /// Reject signed entities whose proof does not verify.
    #[must_use]
    pub fn verify_with(mut self, signer: Arc<dyn Signer>) -> Self {
        self.verifier = Some(signer);
        self
    }

    pub fn stores(&self) -> &[Arc<dyn CasRemote>] {
        &self.stores
    }

    fn store(&self, cas_id: &str) -> Result<&Arc<dyn CasRemote>> {
        self.stores
            .iter()
            .find(|store| store.cas_id() == cas_id)
            .ok_or_else(|| EveesError::not_found("store", cas_id))
    }

    fn route(&self, draft: &EntityCreate) -> Result<&Arc<dyn CasRemote>> {
        if let Some(cas_id) = &draft.cas_id {
            return self.store(cas_id);
        }
        if let Some(cas_id) = draft.remote.as_ref().and_then(|r| self.remote_to_cas.get(r)) {
            return self.store(cas_id);
        }
        self.stores
            .first()
            .ok_or_else(|| EveesError::Precondition("no CAS stores registered".into()))
    }

    fn check_signature(&self, entity: &Entity) -> Result<()> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        if let Some(signed) = as_signed(&entity.object) {
            if !verifier.verify(&signed)? {
                return Err(EveesError::InvalidSignature(entity.id.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CasStore for CasRouter {
    fn target(&self, draft: &EntityCreate) -> Result<CasTarget> {
        let store = self.route(draft)?;
        Ok(CasTarget {
            cas_id: Some(store.cas_id().to_owned()),
            config: store.cid_config(),
        })
    }

    async fn store_entities(&self, drafts: &[EntityCreate]) -> Result<Vec<Entity>> {
        let entities = self.hash_entities(drafts).await?;
        for entity in &entities {
            self.check_signature(entity)?;
        }

        let mut by_store: Vec<(String, Vec<&Entity>)> = Vec::new();
        for entity in &entities {
            let cas_id = entity.cas_id.clone().unwrap_or_default();
            match by_store.iter_mut().find(|(id, _)| *id == cas_id) {
                Some((_, group)) => group.push(entity),
                None => by_store.push((cas_id, vec![entity])),
            }
        }

        for (cas_id, group) in by_store {
            let store = self.store(&cas_id)?;
            let objects = group.iter().map(|e| e.object.clone()).collect();
            let ids = store.create(objects).await?;
            for (entity, id) in group.iter().zip(ids) {
                if entity.id != id {
                    return Err(EveesError::HashMismatch {
                        claimed: entity.id.clone(),
                        computed: id,
                    });
                }
            }
            debug!(cas_id = %cas_id, count = group.len(), "stored entities on remote");
        }
        Ok(entities)
    }

    async fn cache_entities(&self, _entities: &[Entity]) -> Result<()> {
        Ok(())
    }

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let mut found: HashMap<String, Entity> = HashMap::new();
        for store in &self.stores {
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !found.contains_key(*id))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }
            for (id, object) in store.get_many(&missing).await? {
                let entity = Entity {
                    id: id.clone(),
                    object,
                    cas_id: Some(store.cas_id().to_owned()),
                    remote: None,
                };
                if let Err(err) = validate_entities(std::slice::from_ref(&entity)) {
                    warn!(cas_id = store.cas_id(), id = %id, "rejecting fetched entity");
                    return Err(err);
                }
                self.check_signature(&entity)?;
                found.insert(id, entity);
            }
        }

        ids.iter()
            .map(|id| {
                found
                    .remove(id)
                    .ok_or_else(|| EveesError::not_found("entity", id.clone()))
            })
            .collect()
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn diff(&self) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
}
