//! Forking and cloning.
//!
//! A fork copies a perspective tree onto a remote under new perspectives
//! owned by that remote's user. Commits of a fork carry `forking` (and
//! perspectives `meta.forking`) so the source stays traceable, unless the
//! fork is detached. Cloning copies entities verbatim into another CAS.

use std::collections::HashSet;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tracing::debug;

use super::indexing::soft;
use super::{COMMIT_TYPE, Evees, PERSPECTIVE_TYPE};
use crate::cas::{Entity, EntityCreate, Secured};
use crate::error::{EveesError, Result};
use crate::patterns::Behavior;
use crate::types::{
    Commit, CreateCommit, ForkDetails, GetPerspectiveOptions, NewPerspective, PartialPerspective,
    PerspectiveDetails, PerspectiveMeta, Update,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkOptions {
    /// Fork the children of forked data too.
    pub recurse: bool,
    /// Do not record where the fork came from.
    pub detach: bool,
}

impl Default for ForkOptions {
    fn default() -> Self {
        Self {
            recurse: true,
            detach: false,
        }
    }
}

impl ForkOptions {
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            recurse: true,
            detach: true,
        }
    }
}

impl Evees {
    /// Fork a perspective, commit or plain entity onto `remote_id`.
    ///
    /// `parent_id` becomes the guardian of forked perspectives. Returns the
    /// id of the fork. A perspective linked from its own subtree fails with
    /// [`EveesError::CycleDetected`].
    pub async fn fork(
        &self,
        id: &str,
        remote_id: &str,
        parent_id: Option<&str>,
        options: ForkOptions,
    ) -> Result<String> {
        self.fork_in(id, remote_id, parent_id, options, &[]).await
    }

    /// `path` holds the perspectives being forked above `id`.
    fn fork_in<'a>(
        &'a self,
        id: &'a str,
        remote_id: &'a str,
        parent_id: Option<&'a str>,
        options: ForkOptions,
        path: &'a [String],
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let entity = self.get_entity(id).await?;
            match self.recognizer().recognize_type(&entity.object).as_deref() {
                Some(PERSPECTIVE_TYPE) => {
                    self.fork_perspective_in(id, Some(remote_id), parent_id, options, path)
                        .await
                }
                Some(COMMIT_TYPE) => {
                    self.fork_commit_in(id, remote_id, parent_id, options, path)
                        .await
                }
                _ => {
                    self.fork_entity_in(id, remote_id, parent_id, options, path)
                        .await
                }
            }
        }
        .boxed()
    }

    pub async fn fork_perspective(
        &self,
        perspective_id: &str,
        remote_id: Option<&str>,
        guardian_id: Option<&str>,
        options: ForkOptions,
    ) -> Result<String> {
        self.fork_perspective_in(perspective_id, remote_id, guardian_id, options, &[])
            .await
    }

    async fn fork_perspective_in(
        &self,
        perspective_id: &str,
        remote_id: Option<&str>,
        guardian_id: Option<&str>,
        options: ForkOptions,
        path: &[String],
    ) -> Result<String> {
        if path.iter().any(|id| id == perspective_id) {
            return Err(EveesError::CycleDetected(perspective_id.to_owned()));
        }
        let mut path = path.to_vec();
        path.push(perspective_id.to_owned());

        let source = self.get_perspective_entity(perspective_id).await?;
        let remote = self.get_remote(remote_id)?;
        let details = self
            .client()
            .get_perspective(perspective_id, GetPerspectiveOptions::default())
            .await?
            .details;

        let meta = (!options.detach).then(|| PerspectiveMeta {
            forking: Some(ForkDetails {
                perspective_id: source.id.clone(),
                head_id: details.head_id.clone(),
            }),
            ..PerspectiveMeta::default()
        });
        let partial = PartialPerspective {
            context: Some(source.payload().context.clone()),
            meta,
            ..PartialPerspective::default()
        };

        let perspective = remote.snap_perspective(partial, guardian_id).await?;
        self.store_entity(&EntityCreate::from_object(&perspective.object)?.on_remote(remote.id()))
            .await?;

        let head_id = match &details.head_id {
            Some(head_id) => Some(
                self.fork_commit_in(
                    head_id,
                    &perspective.payload().remote,
                    Some(&perspective.id),
                    options,
                    &path,
                )
                .await?,
            ),
            None => None,
        };

        let fork_id = perspective.id.clone();
        self.new_perspective(NewPerspective {
            update: Update {
                perspective_id: fork_id.clone(),
                details: PerspectiveDetails {
                    head_id,
                    guardian_id: guardian_id.map(str::to_owned),
                    can_update: None,
                },
                from_perspective_id: None,
                old_head_id: None,
                index_data: None,
            },
            perspective,
        })
        .await?;

        debug!(perspective_id, fork_id = %fork_id, remote = remote.id(), "forked perspective");
        Ok(fork_id)
    }

    pub async fn fork_commit(
        &self,
        commit_id: &str,
        remote_id: &str,
        parent_id: Option<&str>,
        options: ForkOptions,
    ) -> Result<String> {
        self.fork_commit_in(commit_id, remote_id, parent_id, options, &[])
            .await
    }

    async fn fork_commit_in(
        &self,
        commit_id: &str,
        remote_id: &str,
        parent_id: Option<&str>,
        options: ForkOptions,
        path: &[String],
    ) -> Result<String> {
        let commit: Secured<Commit> = self.get_entity(commit_id).await?.decode()?;
        let data_fork_id = self
            .fork_entity_in(&commit.payload().data_id, remote_id, parent_id, options, path)
            .await?;

        let remote = self.get_remote(Some(remote_id))?;
        let fork = self
            .create_commit(
                CreateCommit {
                    data_id: data_fork_id,
                    creators_ids: vec![remote.user_id().unwrap_or_default()],
                    message: Some(format!("autocommit to fork {commit_id} on remote {remote_id}")),
                    forking: (!options.detach).then(|| commit_id.to_owned()),
                    ..CreateCommit::default()
                },
                Some(remote_id),
            )
            .await?;

        // linked history that only lives locally must reach the target too
        let from_local = match &commit.cas_id {
            Some(cas_id) => self.get_cas_remote(cas_id)?.is_local(),
            None => false,
        };
        if from_local {
            self.clone_commit_rec(commit_id, remote_id).await?;
        }

        Ok(fork.id)
    }

    /// Fork the children of an entity and store the rewritten entity on
    /// `remote_id`. Without `recurse` the entity is reused as is.
    pub async fn fork_entity(
        &self,
        entity_id: &str,
        remote_id: &str,
        parent_id: Option<&str>,
        options: ForkOptions,
    ) -> Result<String> {
        self.fork_entity_in(entity_id, remote_id, parent_id, options, &[])
            .await
    }

    async fn fork_entity_in(
        &self,
        entity_id: &str,
        remote_id: &str,
        parent_id: Option<&str>,
        options: ForkOptions,
        path: &[String],
    ) -> Result<String> {
        if !options.recurse {
            return Ok(entity_id.to_owned());
        }

        let data = self.get_entity(entity_id).await?;
        let object = match soft(self.behavior_concat(&data.object, Behavior::Children))? {
            Some(children) => {
                let forks = try_join_all(
                    children
                        .iter()
                        .map(|child| self.fork_in(child, remote_id, parent_id, options, path)),
                )
                .await?;
                self.recognizer().replace_children(&data.object, forks)?
            }
            None => data.object,
        };

        let entity = self
            .store_entity(&EntityCreate::new(object).on_remote(remote_id))
            .await?;
        Ok(entity.id)
    }

    /// Store entity `id` in the CAS of `remote_id` if it lives elsewhere.
    pub async fn clone_entity(&self, id: &str, remote_id: &str) -> Result<Entity> {
        let remote = self.get_remote(Some(remote_id))?;
        let entity = self.get_entity(id).await?;
        if entity.cas_id.as_deref() == Some(remote.cas_id()) {
            return Ok(entity);
        }

        let draft = EntityCreate::new(entity.object)
            .on_remote(remote.id())
            .on_cas(remote.cas_id());
        self.store_entity(&draft).await
    }

    /// Clone a commit, its data, and every commit it links to.
    pub async fn clone_commit_rec(&self, commit_id: &str, remote_id: &str) -> Result<()> {
        let mut visited = HashSet::new();
        let mut queue = vec![commit_id.to_owned()];

        while let Some(id) = queue.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let commit: Secured<Commit> = self.clone_entity(&id, remote_id).await?.decode()?;
            let payload = commit.object.payload;
            self.clone_entity(&payload.data_id, remote_id).await?;

            queue.extend(payload.parents_ids);
            queue.extend(payload.forking);
        }

        debug!(commit_id, remote_id, cloned = visited.len(), "cloned commit history");
        Ok(())
    }
}
