//! Content-addressed entity model and stores.
//!
//! An [`Entity`] is an immutable JSON object keyed by the CID of its canonical
//! bytes. Drafts ([`EntityCreate`]) carry routing hints that select which CAS
//! remote, and therefore which [`CidConfig`], an entity is hashed under.

pub mod canonical;
pub mod hash;
pub mod memory;
pub mod remote;
pub mod router;
pub mod signed;
pub mod store;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use hash::{CidConfig, Codec, HashAlgorithm, IdBase, hash_object, validate_entities};
pub use memory::CasOnMemory;
pub use remote::MemoryCasRemote;
pub use router::CasRouter;
pub use signed::{Proof, Signed, Signer, sign_object};
pub use store::{CasRemote, CasStore, CasTarget};

/// A hash-addressed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity<T = Value> {
    pub id: String,
    pub object: T,
    /// CAS remote the entity was stored in or fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_id: Option<String>,
    /// Evees remote the entity was created for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// An entity whose object is a signed payload.
pub type Secured<T> = Entity<Signed<T>>;

impl Entity<Value> {
    /// View the object as a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Entity<T>> {
        Ok(Entity {
            id: self.id.clone(),
            object: serde_json::from_value(self.object.clone())?,
            cas_id: self.cas_id.clone(),
            remote: self.remote.clone(),
        })
    }
}

impl<T: Serialize> Entity<T> {
    /// Erase the object type.
    pub fn encode(&self) -> Result<Entity<Value>> {
        Ok(Entity {
            id: self.id.clone(),
            object: serde_json::to_value(&self.object)?,
            cas_id: self.cas_id.clone(),
            remote: self.remote.clone(),
        })
    }
}

impl<T> Secured<T> {
    /// The signed payload.
    pub const fn payload(&self) -> &T {
        &self.object.payload
    }
}

/// An entity draft that has not been hashed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCreate {
    pub object: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_id: Option<String>,
}

impl EntityCreate {
    #[must_use]
    pub const fn new(object: Value) -> Self {
        Self {
            object,
            remote: None,
            cas_id: None,
        }
    }

    /// Serialize a typed object into a draft.
    pub fn from_object<T: Serialize>(object: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(object)?))
    }

    #[must_use]
    pub fn on_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    #[must_use]
    pub fn on_cas(mut self, cas_id: impl Into<String>) -> Self {
        self.cas_id = Some(cas_id.into());
        self
    }
}

impl From<&Entity> for EntityCreate {
    fn from(entity: &Entity) -> Self {
        Self {
            object: entity.object.clone(),
            remote: entity.remote.clone(),
            cas_id: entity.cas_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_serializes_camel_case_and_skips_empty_hints() {
        let entity = Entity {
            id: "zb2".to_owned(),
            object: json!({"text": "a"}),
            cas_id: Some("local".to_owned()),
            remote: None,
        };
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value, json!({"id": "zb2", "object": {"text": "a"}, "casId": "local"}));
    }

    #[test]
    fn decode_and_encode_keep_provenance() {
        let entity = Entity {
            id: "zb2".to_owned(),
            object: sign_object(json!({"n": 1})),
            cas_id: Some("local".to_owned()),
            remote: Some("r".to_owned()),
        };
        let erased = entity.encode().unwrap();
        let typed: Secured<Value> = erased.decode().unwrap();
        assert_eq!(typed, entity);
        assert_eq!(typed.payload(), &json!({"n": 1}));
    }

    #[test]
    fn draft_builders() {
        let draft = EntityCreate::new(json!(1)).on_remote("local").on_cas("memory");
        assert_eq!(draft.remote.as_deref(), Some("local"));
        assert_eq!(draft.cas_id.as_deref(), Some("memory"));
    }
}
