//! Client hierarchy.
//!
//! A [`Client`] tracks perspective details (heads, guardians) and stores
//! entities through its [`CasStore`]. Layers compose:
//! [`cached::ClientCachedWithBase`] keeps a read cache plus pending local
//! mutations over a base client, and pushes them down on `flush`.
//! [`router::RemoteRouter`] is the usual bottom layer, dispatching each
//! perspective to the remote that owns it.

pub mod cache;
pub mod cached;
pub mod events;
pub mod memory;
pub mod router;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cas::{CasStore, Entity, EntityCreate};
use crate::error::Result;
use crate::types::{
    EveesMutation, EveesMutationCreate, GetPerspectiveOptions, NewPerspective,
    PerspectiveGetResult, Update,
};

pub use cache::{CacheOnMemory, CachedDetails, ClientCache};
pub use cached::ClientCachedWithBase;
pub use events::{ClientEvents, SubscriptionId};
pub use memory::ClientOnMemory;
pub use router::RemoteRouter;

#[async_trait]
pub trait Client: Send + Sync {
    fn name(&self) -> &str;

    fn store(&self) -> Arc<dyn CasStore>;

    fn events(&self) -> Arc<ClientEvents>;

    async fn get_perspective(
        &self,
        perspective_id: &str,
        options: GetPerspectiveOptions,
    ) -> Result<PerspectiveGetResult>;

    async fn update(&self, mutation: EveesMutationCreate) -> Result<()>;

    async fn new_perspective(&self, new_perspective: NewPerspective) -> Result<()> {
        self.update(EveesMutationCreate {
            new_perspectives: vec![new_perspective],
            ..EveesMutationCreate::default()
        })
        .await
    }

    async fn update_perspective(&self, update: Update) -> Result<()> {
        self.update(EveesMutationCreate {
            updates: vec![update],
            ..EveesMutationCreate::default()
        })
        .await
    }

    async fn delete_perspective(&self, perspective_id: &str) -> Result<()> {
        self.update(EveesMutationCreate {
            deleted_perspectives: vec![perspective_id.to_owned()],
            ..EveesMutationCreate::default()
        })
        .await
    }

    async fn hash_entities(&self, drafts: &[EntityCreate]) -> Result<Vec<Entity>> {
        self.store().hash_entities(drafts).await
    }

    async fn can_update(&self, perspective_id: &str, user_id: Option<&str>) -> Result<bool>;

    /// Push pending local state to the layer below.
    async fn flush(&self) -> Result<()>;

    /// Pending local state not yet flushed.
    async fn diff(&self) -> Result<EveesMutation>;

    /// Drop pending local state.
    async fn clear(&self) -> Result<()>;

    /// Perspectives of the current user sharing a context with `perspective_id`.
    async fn get_user_perspectives(&self, perspective_id: &str) -> Result<Vec<String>>;
}
