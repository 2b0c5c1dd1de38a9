//! Diff exploration: which perspectives under a root a workspace changed.

use std::collections::HashSet;

use tracing::warn;

use super::Evees;
use crate::cas::Secured;
use crate::error::Result;
use crate::types::{Commit, Update, UpdateDetails};

impl Evees {
    /// Walk the tree under `perspective_id` (as this service sees it) and
    /// report each perspective the workspace diff moves.
    ///
    /// Paths list the perspective ids below the root, the root itself has
    /// an empty path. Old data is the data of the new head's first parent.
    pub async fn explore_diff_under(
        &self,
        perspective_id: &str,
        workspace: &Self,
    ) -> Result<Vec<UpdateDetails>> {
        let mutation = workspace.client().diff().await?;

        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(perspective_id.to_owned(), Vec::<String>::new())];

        while let Some((id, path)) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }

            let update = mutation
                .updates
                .iter()
                .find(|update| update.perspective_id == id && update.details.head_id.is_some());
            if let Some(update) = update {
                found.push(workspace.update_details(update, path.clone()).await?);
            }

            let children = self.get_perspective_children(&id).await?;
            for child in children.into_iter().rev() {
                let mut child_path = path.clone();
                child_path.push(child.clone());
                stack.push((child, child_path));
            }
        }

        Ok(found)
    }

    async fn update_details(&self, update: &Update, path: Vec<String>) -> Result<UpdateDetails> {
        let store = self.store();
        let head_id = update.details.head_id.as_deref().unwrap_or_default();
        let head: Secured<Commit> = store.get_entity(head_id).await?.decode()?;
        let new_data = store.get_entity(&head.payload().data_id).await?;

        let parents = &head.payload().parents_ids;
        if parents.len() > 1 {
            warn!(head_id, parents = parents.len(), "merge commit, old data taken from first parent");
        }
        let old_data = match parents.first() {
            Some(parent_id) => {
                let parent: Secured<Commit> = store.get_entity(parent_id).await?.decode()?;
                Some(store.get_entity(&parent.payload().data_id).await?)
            }
            None => None,
        };

        Ok(UpdateDetails {
            path,
            new_data,
            old_data,
            update: update.clone(),
        })
    }
}
