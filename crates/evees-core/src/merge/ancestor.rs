//! Ancestry queries over the commit graph.
//!
//! Commits are fetched lazily from a [`CasStore`]. [`FindAncestor`] stops
//! at its target; the common-ancestor search reads both full histories.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::cas::{CasStore, Secured};
use crate::error::Result;
use crate::types::Commit;

/// Parent commits of `commit_id`, plus its fork source when `with_forking`.
async fn parents_of(store: &dyn CasStore, commit_id: &str, with_forking: bool) -> Result<Vec<String>> {
    let commit: Secured<Commit> = store.get_entity(commit_id).await?.decode()?;
    let mut parents = commit.object.payload.parents_ids;
    if with_forking {
        parents.extend(commit.object.payload.forking);
    }
    Ok(parents)
}

/// Searches the history below a head for one commit.
pub struct FindAncestor {
    store: Arc<dyn CasStore>,
    target: String,
    stop_at: Option<String>,
}

impl FindAncestor {
    pub fn new(store: Arc<dyn CasStore>, target: &str, stop_at: Option<&str>) -> Self {
        Self {
            store,
            target: target.to_owned(),
            stop_at: stop_at.map(str::to_owned),
        }
    }

    /// True if the target is `head_id` or one of its ancestors.
    ///
    /// Reaching `stop_at` ends the whole search with `false`.
    pub async fn check_if_parent(&self, head_id: &str) -> Result<bool> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([head_id.to_owned()]);

        while let Some(commit_id) = queue.pop_front() {
            if commit_id == self.target {
                return Ok(true);
            }
            if self.stop_at.as_deref() == Some(commit_id.as_str()) {
                debug!(commit_id = %commit_id, "ancestor search stopped");
                return Ok(false);
            }
            if !visited.insert(commit_id.clone()) {
                continue;
            }
            queue.extend(parents_of(self.store.as_ref(), &commit_id, false).await?);
        }

        Ok(false)
    }
}

/// Most recent commit that is an ancestor of both `tip_a` and `tip_b`
/// (either tip counts as its own ancestor). `None` if the histories are
/// disjoint.
///
/// Both histories are walked in full and intersected. A common ancestor is
/// a candidate only if no other common ancestor descends from it, so a
/// merge commit that also links an older commit still meets at the newer
/// one. Criss-cross histories have several candidates; the one closest to
/// `tip_a` wins. A fork commit's `forking` source counts as a parent here.
pub async fn find_most_recent_common_ancestor(
    store: &dyn CasStore,
    tip_a: &str,
    tip_b: &str,
) -> Result<Option<String>> {
    if tip_a == tip_b {
        return Ok(Some(tip_a.to_owned()));
    }

    let (order_a, parents_a) = ancestry(store, tip_a).await?;
    let (_, parents_b) = ancestry(store, tip_b).await?;

    let common: HashSet<&String> = parents_a.keys().filter(|id| parents_b.contains_key(*id)).collect();
    // every strict ancestor of a common commit is common too, so checking
    // direct parents is enough
    let dominated: HashSet<&String> = common
        .iter()
        .flat_map(|id| &parents_a[*id])
        .filter(|parent| common.contains(parent))
        .collect();

    let mut candidates = order_a
        .iter()
        .filter(|id| common.contains(id) && !dominated.contains(id));
    let lca = candidates.next().cloned();
    let others = candidates.count();
    if others > 0 {
        debug!(tip_a, tip_b, lca = ?lca, others, "several most recent common ancestors");
    }
    Ok(lca)
}

/// Every commit reachable from `tip` in breadth-first order, with its
/// parents.
async fn ancestry(store: &dyn CasStore, tip: &str) -> Result<(Vec<String>, HashMap<String, Vec<String>>)> {
    let mut order = Vec::new();
    let mut parents: HashMap<String, Vec<String>> = HashMap::new();
    let mut queue: VecDeque<String> = VecDeque::from([tip.to_owned()]);

    while let Some(commit_id) = queue.pop_front() {
        if parents.contains_key(&commit_id) {
            continue;
        }
        let commit_parents = parents_of(store, &commit_id, true).await?;
        queue.extend(
            commit_parents
                .iter()
                .filter(|id| !parents.contains_key(*id))
                .cloned(),
        );
        parents.insert(commit_id.clone(), commit_parents);
        order.push(commit_id);
    }

    Ok((order, parents))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
