//! Merge engine.
//!
//! [`simple::SimpleMergeStrategy`] merges two perspectives by finding the most
//! recent common ancestor of their heads and three-way merging the data with
//! the object's `Merge` capability. Links between perspectives are merged as
//! plain arrays.
//!
//! [`recursive::RecursiveContextMergeStrategy`] additionally walks the child
//! links of both sides, pairs sub-perspectives that share a `context`, and
//! merges each pair recursively before merging the parent.

pub mod ancestor;
pub mod recursive;
pub mod simple;
pub mod utils;

use async_trait::async_trait;

use crate::error::Result;

pub use ancestor::{FindAncestor, find_most_recent_common_ancestor};
pub use recursive::{MergeSession, RecursiveContextMergeStrategy};
pub use simple::SimpleMergeStrategy;
pub use utils::{array_diff, merge_arrays, merge_result, merge_strings, merge_values};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeConfig {
    /// Fork perspectives that only exist on the `from` side onto the remote
    /// of the merge target, instead of linking the original.
    pub force_owner: bool,
    /// Perspective that new forks are guarded by.
    pub parent_id: Option<String>,
    /// Forks drop their `forking` provenance.
    pub detach: Option<bool>,
}

impl MergeConfig {
    /// Config for merging the children of `parent_id`.
    #[must_use]
    pub fn under(&self, parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..self.clone()
        }
    }
}

/// Merges the link lists of an object during a data merge.
#[async_trait]
pub trait LinkMerger: Send + Sync {
    async fn merge_links(
        &self,
        original: &[String],
        modifications: &[Vec<String>],
        config: &MergeConfig,
    ) -> Result<Vec<String>>;
}
