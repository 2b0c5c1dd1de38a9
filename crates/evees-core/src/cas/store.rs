//! Store contracts.

use async_trait::async_trait;
use serde_json::Value;

use super::hash::{CidConfig, hash_object};
use super::{Entity, EntityCreate};
use crate::error::{EveesError, Result};

/// Where a draft will be hashed and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasTarget {
    pub cas_id: Option<String>,
    pub config: CidConfig,
}

impl CasTarget {
    /// Hash a draft under this target without storing it.
    pub fn hash(&self, draft: &EntityCreate) -> Result<Entity> {
        Ok(Entity {
            id: hash_object(&draft.object, &self.config)?,
            object: draft.object.clone(),
            cas_id: self.cas_id.clone().or_else(|| draft.cas_id.clone()),
            remote: draft.remote.clone(),
        })
    }
}

/// A pluggable entity store.
///
/// Batch operations do not roll back partial success.
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Resolve the CAS remote and id scheme for a draft.
    fn target(&self, draft: &EntityCreate) -> Result<CasTarget>;

    /// Hash drafts without persisting them.
    async fn hash_entities(&self, drafts: &[EntityCreate]) -> Result<Vec<Entity>> {
        drafts
            .iter()
            .map(|draft| self.target(draft)?.hash(draft))
            .collect()
    }

    async fn hash_entity(&self, draft: &EntityCreate) -> Result<Entity> {
        self.target(draft)?.hash(draft)
    }

    /// Hash and persist drafts. Idempotent.
    async fn store_entities(&self, drafts: &[EntityCreate]) -> Result<Vec<Entity>>;

    async fn store_entity(&self, draft: &EntityCreate) -> Result<Entity> {
        let mut stored = self.store_entities(std::slice::from_ref(draft)).await?;
        stored
            .pop()
            .ok_or_else(|| EveesError::Precondition("store returned no entity".into()))
    }

    /// Admit already-hashed entities into a local cache without provenance.
    async fn cache_entities(&self, entities: &[Entity]) -> Result<()>;

    /// Read entities; any missing id fails with `NotFound`.
    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>>;

    async fn get_entity(&self, id: &str) -> Result<Entity> {
        let mut found = self.get_entities(&[id.to_owned()]).await?;
        found.pop().ok_or_else(|| EveesError::not_found("entity", id))
    }

    /// Push locally held writes to the layer below.
    async fn flush(&self) -> Result<()>;

    /// Locally held, unflushed entities.
    async fn diff(&self) -> Result<Vec<Entity>>;
}

/// A remote content-addressable store.
#[async_trait]
pub trait CasRemote: Send + Sync {
    fn cas_id(&self) -> &str;

    fn cid_config(&self) -> CidConfig;

    /// Local stores are cheap to write to and hold cloned entities for forks.
    fn is_local(&self) -> bool;

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Value>>;

    async fn get_many(&self, ids: &[String]) -> Result<Vec<(String, Value)>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(object) = self.get(id).await? {
                found.push((id.clone(), object));
            }
        }
        Ok(found)
    }

    /// Persist objects, returning the ids the remote assigned to them.
    async fn create(&self, objects: Vec<Value>) -> Result<Vec<String>>;
}
