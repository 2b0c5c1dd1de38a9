//! The Evees service.
//!
//! [`Evees`] ties a [`Client`] (usually a cache chain over a
//! [`crate::client::RemoteRouter`]), the registered remotes and CAS stores,
//! and a [`PatternRecognizer`] together. It is cheap to clone; clones share
//! the same pending-update scheduler.

pub mod explore;
pub mod fork;
pub mod indexing;
pub mod pending;
pub mod tree;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::cas::{CasRemote, CasStore, Entity, EntityCreate, Secured};
use crate::client::{Client, ClientOnMemory};
use crate::config::EveesConfig;
use crate::error::{EveesError, Result};
use crate::merge::FindAncestor;
use crate::patterns::{Behavior, Capability, PatternRecognizer};
use crate::remote::{RemoteEvees, create_commit, get_home};
use crate::types::{
    Commit, CreateCommit, CreateEvee, EveesMutation, EveesMutationCreate, GetPerspectiveOptions,
    NewPerspective, Perspective, PerspectiveDetails, PerspectiveGetResult, Update,
    UpdatePerspectiveData,
};

pub use fork::ForkOptions;
pub use pending::PendingUpdate;
pub use tree::{ChildElement, ChildRef, SpliceResult};

use pending::PendingUpdates;

/// Type name of signed perspective objects.
pub const PERSPECTIVE_TYPE: &str = "Perspective";
/// Type name of signed commit objects.
pub const COMMIT_TYPE: &str = "Commit";

struct EveesInner {
    name: String,
    client: Arc<dyn Client>,
    recognizer: Arc<PatternRecognizer>,
    remotes: Vec<Arc<dyn RemoteEvees>>,
    stores: Vec<Arc<dyn CasRemote>>,
    config: EveesConfig,
    pending: PendingUpdates,
}

#[derive(Clone)]
pub struct Evees {
    inner: Arc<EveesInner>,
}

impl Evees {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn Client>,
        recognizer: Arc<PatternRecognizer>,
        remotes: Vec<Arc<dyn RemoteEvees>>,
        stores: Vec<Arc<dyn CasRemote>>,
        config: EveesConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EveesInner {
                name: name.into(),
                client,
                recognizer,
                remotes,
                stores,
                config,
                pending: PendingUpdates::default(),
            }),
        }
    }

    /// A new service over a [`ClientOnMemory`] whose base is this service's
    /// client. Changes stay in the workspace until it is flushed.
    pub async fn clone_workspace(
        &self,
        name: impl Into<String>,
        mutation: Option<EveesMutation>,
    ) -> Result<Self> {
        let name = name.into();
        let base = self.inner.client.clone();
        let client = match mutation {
            Some(mutation) => ClientOnMemory::with_mutation(name.clone(), base, mutation).await?,
            None => ClientOnMemory::new(name.clone(), base),
        };
        debug!(evees = %self.inner.name, workspace = %name, "cloned workspace");
        Ok(Self::new(
            name,
            Arc::new(client),
            self.inner.recognizer.clone(),
            self.inner.remotes.clone(),
            self.inner.stores.clone(),
            self.inner.config.clone(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.inner.client
    }

    pub fn store(&self) -> Arc<dyn CasStore> {
        self.inner.client.store()
    }

    pub fn recognizer(&self) -> &PatternRecognizer {
        &self.inner.recognizer
    }

    pub fn config(&self) -> &EveesConfig {
        &self.inner.config
    }

    pub fn remotes(&self) -> &[Arc<dyn RemoteEvees>] {
        &self.inner.remotes
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// First remote whose id contains `query`.
    pub fn find_remote(&self, query: &str) -> Result<Arc<dyn RemoteEvees>> {
        self.inner
            .remotes
            .iter()
            .find(|remote| remote.id().contains(query))
            .cloned()
            .ok_or_else(|| EveesError::not_found("remote", query))
    }

    /// Remote `remote_id`, or the default remote when none is given.
    pub fn get_remote(&self, remote_id: Option<&str>) -> Result<Arc<dyn RemoteEvees>> {
        let wanted = remote_id.or(self.inner.config.default_remote.as_deref());
        let found = match wanted {
            Some(id) => self.inner.remotes.iter().find(|remote| remote.id() == id),
            None => self.inner.remotes.first(),
        };
        found
            .cloned()
            .ok_or_else(|| EveesError::not_found("remote", wanted.unwrap_or("<default>")))
    }

    pub fn get_cas_remote(&self, cas_id: &str) -> Result<Arc<dyn CasRemote>> {
        self.inner
            .stores
            .iter()
            .find(|store| store.cas_id() == cas_id)
            .cloned()
            .ok_or_else(|| EveesError::not_found("store", cas_id))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.store().get_entity(id).await
    }

    pub async fn store_entity(&self, draft: &EntityCreate) -> Result<Entity> {
        self.store().store_entity(draft).await
    }

    pub async fn hash_entity(&self, draft: &EntityCreate) -> Result<Entity> {
        self.store().hash_entity(draft).await
    }

    /// Perspective details, observing a pending debounced update if any.
    pub async fn get_perspective(
        &self,
        perspective_id: &str,
        options: GetPerspectiveOptions,
    ) -> Result<PerspectiveGetResult> {
        let mut result = self.inner.client.get_perspective(perspective_id, options).await?;
        if let Some(pending) = self.inner.pending.get(perspective_id) {
            result.details.overlay(&pending.update.details);
        }
        Ok(result)
    }

    pub async fn get_perspective_data(&self, perspective_id: &str) -> Result<Entity> {
        self.try_get_perspective_data(perspective_id)
            .await?
            .ok_or_else(|| EveesError::not_found("perspective data", perspective_id))
    }

    /// `None` if the perspective has no head.
    pub async fn try_get_perspective_data(&self, perspective_id: &str) -> Result<Option<Entity>> {
        if let Some(pending) = self.inner.pending.get(perspective_id) {
            return Ok(Some(pending.data));
        }
        let result = self.get_perspective(perspective_id, GetPerspectiveOptions::default()).await?;
        self.try_get_commit_data(result.details.head_id.as_deref()).await
    }

    pub async fn get_commit(&self, commit_id: &str) -> Result<Secured<Commit>> {
        self.get_entity(commit_id).await?.decode()
    }

    pub async fn get_commit_data(&self, commit_id: &str) -> Result<Entity> {
        let commit = self.get_commit(commit_id).await?;
        self.get_entity(&commit.payload().data_id).await
    }

    pub async fn try_get_commit_data(&self, commit_id: Option<&str>) -> Result<Option<Entity>> {
        match commit_id {
            Some(commit_id) => self.get_commit_data(commit_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Data behind `id`: a perspective's head data, a commit's data, or the
    /// entity itself.
    pub async fn get_data(&self, id: &str) -> Result<Entity> {
        let entity = self.get_entity(id).await?;
        match self.inner.recognizer.recognize_type(&entity.object).as_deref() {
            Some(PERSPECTIVE_TYPE) => self.get_perspective_data(id).await,
            Some(COMMIT_TYPE) => self.get_commit_data(id).await,
            _ => Ok(entity),
        }
    }

    pub async fn get_perspective_entity(&self, perspective_id: &str) -> Result<Secured<Perspective>> {
        self.get_entity(perspective_id).await?.decode()
    }

    pub async fn get_perspective_context(&self, perspective_id: &str) -> Result<String> {
        Ok(self.get_perspective_entity(perspective_id).await?.object.payload.context)
    }

    pub async fn get_perspective_remote(&self, perspective_id: &str) -> Result<Arc<dyn RemoteEvees>> {
        let perspective = self.get_perspective_entity(perspective_id).await?;
        self.get_remote(Some(&perspective.payload().remote))
    }

    /// True if the entity at `id` is recognized as `pattern`.
    pub async fn is_of_pattern(&self, id: &str, pattern: &str) -> Result<bool> {
        let entity = self.get_entity(id).await?;
        Ok(self.inner.recognizer.recognize_type(&entity.object).as_deref() == Some(pattern))
    }

    // -----------------------------------------------------------------------
    // Behaviors
    // -----------------------------------------------------------------------

    pub fn behavior(&self, object: &Value, behavior: Behavior) -> Result<Vec<Capability>> {
        self.inner.recognizer.behaviors(object, behavior)
    }

    #[must_use]
    pub fn has_behavior(&self, object: &Value, behavior: Behavior) -> bool {
        self.inner.recognizer.has_behavior(object, behavior)
    }

    pub fn behavior_first(&self, object: &Value, behavior: Behavior) -> Result<Capability> {
        self.inner.recognizer.behavior_first(object, behavior)
    }

    pub fn behavior_concat(&self, object: &Value, behavior: Behavior) -> Result<Vec<String>> {
        self.inner.recognizer.behavior_concat(object, behavior)
    }

    /// First capability of the perspective's current data.
    pub async fn perspective_behavior_first(
        &self,
        perspective_id: &str,
        behavior: Behavior,
    ) -> Result<Capability> {
        let data = self.get_perspective_data(perspective_id).await?;
        self.behavior_first(&data.object, behavior)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Index every update of `mutation`, then hand it to the client.
    pub async fn update(&self, mutation: EveesMutationCreate) -> Result<()> {
        let EveesMutationCreate {
            entities,
            new_perspectives,
            updates,
            deleted_perspectives,
        } = mutation;

        if !entities.is_empty() {
            self.store().store_entities(&entities).await?;
        }

        let mut indexed_news = Vec::with_capacity(new_perspectives.len());
        for mut new_perspective in new_perspectives {
            new_perspective.update = self.append_indexing(new_perspective.update).await?;
            indexed_news.push(new_perspective);
        }
        let mut indexed_updates = Vec::with_capacity(updates.len());
        for update in updates {
            indexed_updates.push(self.append_indexing(update).await?);
        }

        self.inner
            .client
            .update(EveesMutationCreate {
                entities: Vec::new(),
                new_perspectives: indexed_news,
                updates: indexed_updates,
                deleted_perspectives,
            })
            .await
    }

    pub async fn new_perspective(&self, mut new_perspective: NewPerspective) -> Result<()> {
        new_perspective.update = self.append_indexing(new_perspective.update).await?;
        self.inner.client.new_perspective(new_perspective).await
    }

    /// Apply an update now, flushing the client if asked or if the config
    /// autoflushes.
    pub async fn update_perspective(&self, update: Update, flush: bool) -> Result<()> {
        let update = self.append_indexing(update).await?;
        self.inner.client.update_perspective(update).await?;

        if flush || self.inner.config.flush.autoflush {
            self.inner.client.flush().await?;
        }
        Ok(())
    }

    pub async fn delete_perspective(&self, perspective_id: &str) -> Result<()> {
        self.inner.client.delete_perspective(perspective_id).await
    }

    /// Build and store a commit on `remote_id`. Creators default to the
    /// remote's user.
    pub async fn create_commit(
        &self,
        mut commit: CreateCommit,
        remote_id: Option<&str>,
    ) -> Result<Secured<Commit>> {
        let remote = self.get_remote(remote_id)?;
        if commit.creators_ids.is_empty() {
            commit.creators_ids = vec![remote.user_id().unwrap_or_default()];
        }
        let draft = EntityCreate::from_object(&create_commit(commit))?.on_remote(remote.id());
        self.store_entity(&draft).await?.decode()
    }

    /// Create a perspective, optionally with an initial head holding
    /// `object`. Returns the perspective id.
    pub async fn create_evee(&self, input: CreateEvee) -> Result<String> {
        let remote_id = match (&input.remote_id, &input.guardian_id) {
            (Some(remote_id), _) => remote_id.clone(),
            (None, Some(guardian_id)) => self.get_perspective_remote(guardian_id).await?.id().to_owned(),
            (None, None) => self.get_remote(None)?.id().to_owned(),
        };
        let remote = self.get_remote(Some(&remote_id))?;

        let head_id = match input.object {
            Some(object) => {
                let data = self
                    .store_entity(&EntityCreate::new(object).on_remote(&remote_id))
                    .await?;
                let commit = self
                    .create_commit(
                        CreateCommit {
                            data_id: data.id,
                            ..CreateCommit::default()
                        },
                        Some(&remote_id),
                    )
                    .await?;
                Some(commit.id)
            }
            None => None,
        };

        let perspective = match &input.perspective_id {
            Some(perspective_id) => self.get_perspective_entity(perspective_id).await?,
            None => {
                remote
                    .snap_perspective(
                        input.partial_perspective.unwrap_or_default(),
                        input.guardian_id.as_deref(),
                    )
                    .await?
            }
        };
        let perspective_id = perspective.id.clone();

        self.new_perspective(NewPerspective {
            update: Update {
                perspective_id: perspective_id.clone(),
                details: PerspectiveDetails {
                    head_id,
                    guardian_id: input.guardian_id,
                    can_update: None,
                },
                from_perspective_id: None,
                old_head_id: None,
                index_data: input.index_data,
            },
            perspective,
        })
        .await?;

        debug!(perspective_id = %perspective_id, remote = %remote_id, "created evee");
        Ok(perspective_id)
    }

    /// Data of the perspective, initializing it with `object` when the
    /// perspective has no head yet.
    pub async fn get_or_create_perspective_data(
        &self,
        perspective_id: &str,
        object: Value,
        guardian_id: Option<&str>,
    ) -> Result<Entity> {
        if let Some(data) = self.try_get_perspective_data(perspective_id).await? {
            return Ok(data);
        }

        let perspective = self.get_perspective_entity(perspective_id).await?;
        let remote = perspective.payload().remote.clone();
        let data = self
            .store_entity(&EntityCreate::new(object).on_remote(&remote))
            .await?;
        let commit = self
            .create_commit(
                CreateCommit {
                    data_id: data.id.clone(),
                    ..CreateCommit::default()
                },
                Some(&remote),
            )
            .await?;

        let mut update = Update::head(perspective_id, commit.id);
        update.details.guardian_id = guardian_id.map(str::to_owned);
        self.update_perspective(update, false).await?;
        Ok(data)
    }

    /// Debounced data update. See [`pending`].
    pub async fn update_perspective_data(&self, options: UpdatePerspectiveData) -> Result<()> {
        let UpdatePerspectiveData {
            perspective_id,
            object,
            flush,
            on_head_id,
            guardian_id,
            index_data,
        } = options;

        // the parent is the head the client knows, not a pending one
        let parents_ids = match on_head_id {
            Some(on_head_id) => vec![on_head_id],
            None => self
                .inner
                .client
                .get_perspective(&perspective_id, GetPerspectiveOptions::default())
                .await?
                .details
                .head_id
                .into_iter()
                .collect(),
        };

        let remote = self.get_perspective_remote(&perspective_id).await?;
        let store = self.store();
        let data = store
            .hash_entity(&EntityCreate::new(object).on_remote(remote.id()))
            .await?;
        let commit_object = create_commit(CreateCommit {
            data_id: data.id.clone(),
            parents_ids,
            creators_ids: vec![remote.user_id().unwrap_or_default()],
            ..CreateCommit::default()
        });
        let commit = store
            .hash_entity(&EntityCreate::from_object(&commit_object)?.on_remote(remote.id()))
            .await?;

        let update = Update {
            perspective_id: perspective_id.clone(),
            details: PerspectiveDetails {
                head_id: Some(commit.id.clone()),
                guardian_id,
                can_update: None,
            },
            from_perspective_id: None,
            old_head_id: None,
            index_data,
        };

        let flush = flush.unwrap_or_else(|| self.inner.config.flush.clone());
        let pending = PendingUpdate {
            flush,
            update,
            commit,
            data,
        };

        if pending.flush.debounce().is_some() {
            self.schedule_pending(&perspective_id, pending);
            Ok(())
        } else {
            self.execute_update(pending).await
        }
    }

    /// Resolve (and store) the home perspective of a user.
    pub async fn get_home(
        &self,
        remote_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Secured<Perspective>> {
        let remote = self.get_remote(remote_id)?;
        let home = get_home(remote.as_ref(), user_id).await?;
        let draft = EntityCreate::from_object(&home.object)?.on_remote(remote.id());
        self.store_entity(&draft).await?;
        Ok(home)
    }

    /// Walk the history of `perspective_id` looking for `commit_id`.
    pub async fn is_ancestor_commit(
        &self,
        perspective_id: &str,
        commit_id: &str,
        stop_at: Option<&str>,
    ) -> Result<bool> {
        let result = self.get_perspective(perspective_id, GetPerspectiveOptions::default()).await?;
        let Some(head_id) = result.details.head_id else {
            return Ok(false);
        };
        FindAncestor::new(self.store(), commit_id, stop_at)
            .check_if_parent(&head_id)
            .await
    }

    /// True if updates to the perspective should be announced.
    pub async fn check_emit(&self, perspective_id: &str) -> Result<bool> {
        let Some(emit_if) = &self.inner.config.emit_if else {
            return Ok(false);
        };
        let remote = self.get_perspective_remote(perspective_id).await?;
        if remote.id() != emit_if.remote {
            return Ok(false);
        }
        let owner = remote.access_control().get_owner(perspective_id).await?;
        Ok(owner.as_deref() == Some(emit_if.owner.as_str()))
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Materialize every pending update, then flush the client.
    pub async fn flush(&self) -> Result<()> {
        self.await_pending().await?;
        self.inner.client.flush().await?;
        info!(evees = %self.inner.name, "flushed");
        Ok(())
    }

    pub async fn diff(&self) -> Result<EveesMutation> {
        self.inner.client.diff().await
    }
}
