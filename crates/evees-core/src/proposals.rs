//! Merge proposals.
//!
//! A proposal packages the mutation a merge would apply to a perspective
//! tree without applying it. The merge runs in a throw-away workspace and
//! the workspace diff becomes the proposal's mutation. A proposal must be
//! accepted by a single remote, so every perspective it touches has to live
//! on the same one.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EveesError, Result};
use crate::evees::Evees;
use crate::merge::{MergeConfig, RecursiveContextMergeStrategy};
use crate::remote::next_timestamp;
use crate::types::{EveesMutation, GetPerspectiveOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub to_perspective_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_perspective_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_head_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_head_id: Option<String>,
    pub mutation: EveesMutation,
}

impl Proposal {
    /// Package `mutation` as a proposal to `to_perspective_id`.
    ///
    /// Fails with `MultipleAuthorities` if the target and the perspectives
    /// the mutation touches do not all live on one remote.
    pub async fn from_mutation(
        evees: &Evees,
        to_perspective_id: &str,
        from_perspective_id: Option<&str>,
        mutation: EveesMutation,
    ) -> Result<Self> {
        let authorities = authorities(evees, to_perspective_id, &mutation).await?;
        if authorities.len() > 1 {
            return Err(EveesError::MultipleAuthorities(authorities.into_iter().collect()));
        }

        let remote = evees.get_perspective_remote(to_perspective_id).await?;
        let to_head_id = evees
            .get_perspective(to_perspective_id, GetPerspectiveOptions::default())
            .await?
            .details
            .head_id;
        let from_head_id = match from_perspective_id {
            Some(from) => {
                evees
                    .get_perspective(from, GetPerspectiveOptions::default())
                    .await?
                    .details
                    .head_id
            }
            None => None,
        };

        Ok(Self {
            creator_id: remote.user_id(),
            timestamp: Some(next_timestamp()),
            to_perspective_id: to_perspective_id.to_owned(),
            from_perspective_id: from_perspective_id.map(str::to_owned),
            to_head_id,
            from_head_id,
            mutation,
        })
    }
}

/// Remotes of the target and of every perspective `mutation` touches.
async fn authorities(
    evees: &Evees,
    to_perspective_id: &str,
    mutation: &EveesMutation,
) -> Result<BTreeSet<String>> {
    let created: HashMap<&str, &str> = mutation
        .new_perspectives
        .iter()
        .map(|new| (new.id(), new.perspective.payload().remote.as_str()))
        .collect();

    let touched = std::iter::once(to_perspective_id)
        .chain(mutation.updates.iter().map(|update| update.perspective_id.as_str()))
        .chain(mutation.deleted_perspectives.iter().map(String::as_str));

    let mut remotes: BTreeSet<String> = created.values().map(|remote| (*remote).to_owned()).collect();
    for perspective_id in touched {
        let remote = match created.get(perspective_id) {
            Some(remote) => (*remote).to_owned(),
            None => evees.get_perspective_entity(perspective_id).await?.payload().remote.clone(),
        };
        remotes.insert(remote);
    }
    Ok(remotes)
}

/// Merge `from` into `to` in a workspace and package the result.
pub async fn create_merge_proposal(
    evees: &Evees,
    to_perspective_id: &str,
    from_perspective_id: &str,
    config: &MergeConfig,
) -> Result<Proposal> {
    evees.await_pending().await?;
    let workspace = evees.clone_workspace(format!("{}-proposal", evees.name()), None).await?;

    RecursiveContextMergeStrategy::new(workspace.clone())
        .merge_perspectives_external(to_perspective_id, from_perspective_id, config)
        .await?;
    let mutation = workspace.diff().await?;

    let proposal =
        Proposal::from_mutation(evees, to_perspective_id, Some(from_perspective_id), mutation).await?;
    info!(
        to_perspective_id,
        from_perspective_id,
        updates = proposal.mutation.updates.len(),
        new_perspectives = proposal.mutation.new_perspectives.len(),
        "created merge proposal"
    );
    Ok(proposal)
}
