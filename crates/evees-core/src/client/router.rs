//! Base client dispatching each perspective to the remote that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::events::{ClientEvents, SubscriptionId};
use super::Client;
use crate::cas::{CasStore, Secured};
use crate::error::{EveesError, Result};
use crate::remote::RemoteEvees;
use crate::types::{
    EveesMutation, EveesMutationCreate, GetPerspectiveOptions, Perspective, PerspectiveGetResult,
};

pub struct RemoteRouter {
    store: Arc<dyn CasStore>,
    remotes: Vec<Arc<dyn RemoteEvees>>,
    events: Arc<ClientEvents>,
    subscriptions: Vec<SubscriptionId>,
}

impl RemoteRouter {
    pub fn new(store: Arc<dyn CasStore>, remotes: Vec<Arc<dyn RemoteEvees>>) -> Self {
        let events = Arc::new(ClientEvents::default());
        let subscriptions = remotes
            .iter()
            .map(|remote| {
                let events = Arc::downgrade(&events);
                remote.events().subscribe(move |ids| {
                    if let Some(events) = events.upgrade() {
                        events.emit_updated(ids);
                    }
                })
            })
            .collect();

        Self {
            store,
            remotes,
            events,
            subscriptions,
        }
    }

    pub fn remotes(&self) -> &[Arc<dyn RemoteEvees>] {
        &self.remotes
    }

    fn remote_index(&self, remote_id: &str) -> Result<usize> {
        self.remotes
            .iter()
            .position(|remote| remote.id() == remote_id)
            .ok_or_else(|| EveesError::not_found("remote", remote_id))
    }

    async fn remote_index_of(&self, perspective_id: &str) -> Result<usize> {
        let perspective: Secured<Perspective> = self.store.get_entity(perspective_id).await?.decode()?;
        self.remote_index(&perspective.payload().remote)
    }

    async fn remote_of(&self, perspective_id: &str) -> Result<&Arc<dyn RemoteEvees>> {
        let index = self.remote_index_of(perspective_id).await?;
        Ok(&self.remotes[index])
    }
}

impl Drop for RemoteRouter {
    fn drop(&mut self) {
        for (remote, id) in self.remotes.iter().zip(&self.subscriptions) {
            remote.events().unsubscribe(*id);
        }
    }
}

#[async_trait]
impl Client for RemoteRouter {
    fn name(&self) -> &str {
        "router"
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
        self.remote_of(perspective_id)
            .await?
            .get_perspective(perspective_id, options)
            .await
    }

    async fn update(&self, mutation: EveesMutationCreate) -> Result<()> {
        if !mutation.entities.is_empty() {
            self.store.store_entities(&mutation.entities).await?;
        }

        let mut by_remote: Vec<EveesMutationCreate> = vec![EveesMutationCreate::default(); self.remotes.len()];
        let mut created: HashMap<String, usize> = HashMap::new();

        for new_perspective in mutation.new_perspectives {
            let index = self.remote_index(&new_perspective.perspective.payload().remote)?;
            created.insert(new_perspective.id().to_owned(), index);
            by_remote[index].new_perspectives.push(new_perspective);
        }
        for update in mutation.updates {
            let index = match created.get(&update.perspective_id) {
                Some(index) => *index,
                None => self.remote_index_of(&update.perspective_id).await?,
            };
            by_remote[index].updates.push(update);
        }
        for deleted in mutation.deleted_perspectives {
            let index = match created.get(&deleted) {
                Some(index) => *index,
                None => self.remote_index_of(&deleted).await?,
            };
            by_remote[index].deleted_perspectives.push(deleted);
        }

        for (remote, sub) in self.remotes.iter().zip(by_remote) {
            if sub.is_empty() {
                continue;
            }
            debug!(remote = remote.id(), "routing mutation");
            remote.update(sub).await?;
        }
        Ok(())
    }

    async fn can_update(&self, perspective_id: &str, user_id: Option<&str>) -> Result<bool> {
        self.remote_of(perspective_id)
            .await?
            .can_update(perspective_id, user_id)
            .await
    }

    async fn flush(&self) -> Result<()> {
        for remote in &self.remotes {
            remote.flush().await?;
        }
        Ok(())
    }

    async fn diff(&self) -> Result<EveesMutation> {
        Ok(EveesMutation::default())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn get_user_perspectives(&self, perspective_id: &str) -> Result<Vec<String>> {
        self.remote_of(perspective_id)
            .await?
            .get_user_perspectives(perspective_id)
            .await
    }
}
