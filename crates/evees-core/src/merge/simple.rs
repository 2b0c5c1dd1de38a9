//! Three-way merge of two perspectives.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::ancestor::find_most_recent_common_ancestor;
use super::utils::{merge_arrays, merge_values};
use super::{LinkMerger, MergeConfig};
use crate::cas::canonical::canonicalize_json;
use crate::cas::{EntityCreate, Secured};
use crate::error::{EveesError, Result};
use crate::evees::Evees;
use crate::types::{Commit, CreateCommit, GetPerspectiveOptions, PerspectiveDetails, Update};

/// Message of commits created by a merge.
pub const MERGE_COMMIT_MESSAGE: &str = "merge commits";

/// Merges heads through their most recent common ancestor. Links are merged
/// as plain arrays.
#[derive(Clone)]
pub struct SimpleMergeStrategy {
    evees: Evees,
}

impl SimpleMergeStrategy {
    #[must_use]
    pub const fn new(evees: Evees) -> Self {
        Self { evees }
    }

    pub const fn evees(&self) -> &Evees {
        &self.evees
    }

    /// Merge `from` into `to`, merging links as plain arrays.
    #[instrument(skip(self, config), fields(evees = %self.evees.name()))]
    pub async fn merge_perspectives_external(
        &self,
        to_perspective_id: &str,
        from_perspective_id: &str,
        config: &MergeConfig,
    ) -> Result<String> {
        self.evees.await_pending().await?;
        self.merge_perspectives(to_perspective_id, from_perspective_id, config, self)
            .await
    }

    /// Move the head of `to` to the merge of both heads. Returns `to`.
    pub async fn merge_perspectives(
        &self,
        to_perspective_id: &str,
        from_perspective_id: &str,
        config: &MergeConfig,
        merger: &dyn LinkMerger,
    ) -> Result<String> {
        let evees = &self.evees;
        let to = evees
            .get_perspective(to_perspective_id, GetPerspectiveOptions::default())
            .await?
            .details;
        let from = evees
            .get_perspective(from_perspective_id, GetPerspectiveOptions::default())
            .await?
            .details;

        let Some(from_head) = from.head_id else {
            return Ok(to_perspective_id.to_owned());
        };
        if to.head_id.as_deref() == Some(from_head.as_str()) {
            debug!(to_perspective_id, from_perspective_id, "heads already equal");
            return Ok(to_perspective_id.to_owned());
        }

        let config = config.under(to_perspective_id);
        let new_head = match &to.head_id {
            Some(to_head) => {
                let remote = evees.get_perspective_remote(to_perspective_id).await?;
                self.merge_commits(to_head, &from_head, remote.id(), &config, merger)
                    .await?
            }
            None => from_head,
        };

        if to.head_id.as_deref() != Some(new_head.as_str()) {
            evees
                .update_perspective(
                    Update {
                        perspective_id: to_perspective_id.to_owned(),
                        details: PerspectiveDetails::with_head(new_head.clone()),
                        from_perspective_id: Some(from_perspective_id.to_owned()),
                        old_head_id: to.head_id,
                        index_data: None,
                    },
                    false,
                )
                .await?;
            info!(to_perspective_id, from_perspective_id, head_id = %new_head, "merged perspective");
        }

        Ok(to_perspective_id.to_owned())
    }

    /// Walk from a fork commit back to the commit it was forked from, until
    /// a commit with history of its own is reached.
    pub async fn find_latest_non_fork(&self, commit_id: &str) -> Result<String> {
        let mut current = commit_id.to_owned();
        let mut visited = HashSet::new();
        while visited.insert(current.clone()) {
            let commit: Secured<Commit> = self.evees.get_entity(&current).await?.decode()?;
            let payload = commit.object.payload;
            match payload.forking {
                Some(source) if payload.parents_ids.is_empty() => current = source,
                _ => break,
            }
        }
        Ok(current)
    }

    /// Merge commit `from` into commit `to`. Returns the new head, which is
    /// `to` itself when nothing changes.
    pub async fn merge_commits(
        &self,
        to_commit_id: &str,
        from_commit_id: &str,
        remote_id: &str,
        config: &MergeConfig,
        merger: &dyn LinkMerger,
    ) -> Result<String> {
        let evees = &self.evees;
        let store = evees.store();

        let to_base = self.find_latest_non_fork(to_commit_id).await?;
        let from_base = self.find_latest_non_fork(from_commit_id).await?;
        let ancestor = find_most_recent_common_ancestor(store.as_ref(), &to_base, &from_base).await?;

        if ancestor.as_deref() == Some(from_commit_id) {
            debug!(to_commit_id, from_commit_id, "from is already part of to");
            return Ok(to_commit_id.to_owned());
        }

        let to_data = evees.get_commit_data(to_commit_id).await?;
        let from_data = evees.get_commit_data(from_commit_id).await?;
        let ancestor_data = match &ancestor {
            Some(ancestor_id) => evees.get_commit_data(ancestor_id).await?,
            None => to_data.clone(),
        };

        let merged = self
            .merge_data(
                &ancestor_data.object,
                &[to_data.object.clone(), from_data.object],
                config,
                merger,
            )
            .await?;

        if canonicalize_json(&merged) == canonicalize_json(&to_data.object) {
            return Ok(to_commit_id.to_owned());
        }

        let data = evees
            .store_entity(&EntityCreate::new(merged).on_remote(remote_id))
            .await?;
        let commit = evees
            .create_commit(
                CreateCommit {
                    data_id: data.id,
                    parents_ids: vec![to_commit_id.to_owned(), from_commit_id.to_owned()],
                    message: Some(MERGE_COMMIT_MESSAGE.to_owned()),
                    ..CreateCommit::default()
                },
                Some(remote_id),
            )
            .await?;
        Ok(commit.id)
    }

    /// Merge data objects with the original's `Merge` capability, or field
    /// by field if it has none.
    pub async fn merge_data(
        &self,
        original: &Value,
        modifications: &[Value],
        config: &MergeConfig,
        merger: &dyn LinkMerger,
    ) -> Result<Value> {
        let recognizer = self.evees.recognizer();
        let types: Vec<Option<String>> = modifications
            .iter()
            .map(|object| recognizer.recognize_type(object))
            .collect();
        if types.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(EveesError::Conflict(format!(
                "cannot merge objects of different types {types:?}"
            )));
        }

        match recognizer.merger(original) {
            Ok(mergeable) => mergeable.merge(original, modifications, merger, config).await,
            Err(err) if err.is_behavior_not_found() => Ok(merge_values(original, modifications)),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl LinkMerger for SimpleMergeStrategy {
    async fn merge_links(
        &self,
        original: &[String],
        modifications: &[Vec<String>],
        _config: &MergeConfig,
    ) -> Result<Vec<String>> {
        Ok(merge_arrays(original, modifications))
    }
}
