//! Context-aware recursive merge.
//!
//! Two perspectives with the same `context` are the same logical node, even
//! when their ids (and remotes) differ. Before merging, the trees under both
//! roots are walked and every perspective is indexed by context. Link merges
//! then run on contexts, and a context present on both sides is merged
//! recursively into the `to` perspective.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tracing::{debug, info, instrument};

use super::simple::SimpleMergeStrategy;
use super::utils::merge_arrays;
use super::{LinkMerger, MergeConfig};
use crate::error::{EveesError, Result};
use crate::evees::{Evees, ForkOptions, PERSPECTIVE_TYPE};
use crate::patterns::Behavior;
use crate::types::GetPerspectiveOptions;

#[derive(Clone)]
pub struct RecursiveContextMergeStrategy {
    simple: SimpleMergeStrategy,
}

impl RecursiveContextMergeStrategy {
    #[must_use]
    pub const fn new(evees: Evees) -> Self {
        Self {
            simple: SimpleMergeStrategy::new(evees),
        }
    }

    pub const fn simple(&self) -> &SimpleMergeStrategy {
        &self.simple
    }

    /// Merge the tree under `from` into the tree under `to`. Returns `to`.
    #[instrument(skip(self, config), fields(evees = %self.simple.evees().name(), force_owner = config.force_owner))]
    pub async fn merge_perspectives_external(
        &self,
        to_perspective_id: &str,
        from_perspective_id: &str,
        config: &MergeConfig,
    ) -> Result<String> {
        self.simple.evees().await_pending().await?;

        let session = MergeSession::new(&self.simple);
        session
            .read_all_subcontexts(to_perspective_id, from_perspective_id)
            .await?;
        let merged = session
            .merge_perspectives(to_perspective_id, from_perspective_id, config)
            .await?;

        info!(
            to_perspective_id,
            from_perspective_id,
            contexts = session.context_count(),
            "merged perspective trees"
        );
        Ok(merged)
    }
}

/// The perspectives sharing one context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPair {
    pub to: Option<String>,
    pub from: Option<String>,
}

#[derive(Default)]
struct SessionState {
    by_context: HashMap<String, ContextPair>,
    contexts: HashMap<String, String>,
    in_progress: HashSet<(String, String)>,
}

/// State of one top-level recursive merge.
pub struct MergeSession<'a> {
    strategy: &'a SimpleMergeStrategy,
    state: Mutex<SessionState>,
}

impl<'a> MergeSession<'a> {
    #[must_use]
    pub fn new(strategy: &'a SimpleMergeStrategy) -> Self {
        Self {
            strategy,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evees(&self) -> &Evees {
        self.strategy.evees()
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.state().by_context.len()
    }

    /// The perspectives found for `context`.
    #[must_use]
    pub fn pair(&self, context: &str) -> Option<ContextPair> {
        self.state().by_context.get(context).cloned()
    }

    fn set_perspective(&self, perspective_id: &str, context: &str, to: bool) {
        let mut state = self.state();
        let pair = state.by_context.entry(context.to_owned()).or_default();
        if to {
            pair.to = Some(perspective_id.to_owned());
        } else {
            pair.from = Some(perspective_id.to_owned());
        }
        state
            .contexts
            .insert(perspective_id.to_owned(), context.to_owned());
    }

    /// Index both trees by context.
    pub async fn read_all_subcontexts(&self, to_perspective_id: &str, from_perspective_id: &str) -> Result<()> {
        futures::try_join!(
            self.read_perspective(to_perspective_id.to_owned(), true, Vec::new()),
            self.read_perspective(from_perspective_id.to_owned(), false, Vec::new()),
        )?;
        Ok(())
    }

    fn read_perspective(&self, perspective_id: String, to: bool, path: Vec<String>) -> BoxFuture<'_, Result<()>> {
        async move {
            if path.contains(&perspective_id) {
                return Err(EveesError::CycleDetected(perspective_id));
            }

            let evees = self.evees();
            let context = evees.get_perspective_context(&perspective_id).await?;
            self.set_perspective(&perspective_id, &context, to);

            let details = evees
                .get_perspective(&perspective_id, GetPerspectiveOptions::default())
                .await?
                .details;
            if details.head_id.is_none() {
                return Ok(());
            }

            let data = evees.get_perspective_data(&perspective_id).await?;
            let children = match evees.behavior_concat(&data.object, Behavior::Children) {
                Ok(children) => children,
                Err(err) if err.is_behavior_not_found() => return Ok(()),
                Err(err) => return Err(err),
            };

            let mut child_path = path;
            child_path.push(perspective_id);
            let mut reads = Vec::new();
            for child in children {
                if self.is_perspective(&child).await? {
                    reads.push(self.read_perspective(child, to, child_path.clone()));
                }
            }
            try_join_all(reads).await?;
            Ok(())
        }
        .boxed()
    }

    /// True if `id` is a stored perspective. Unknown ids are literal links.
    async fn is_perspective(&self, id: &str) -> Result<bool> {
        match self.evees().is_of_pattern(id, PERSPECTIVE_TYPE).await {
            Ok(is) => Ok(is),
            Err(EveesError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn merge_id(&self, link: &str) -> Result<String> {
        if !self.is_perspective(link).await? {
            return Ok(link.to_owned());
        }
        let known = self.state().contexts.get(link).cloned();
        match known {
            Some(context) => Ok(context),
            None => self.evees().get_perspective_context(link).await,
        }
    }

    /// Merge `from` into `to` within this session.
    pub async fn merge_perspectives(
        &self,
        to_perspective_id: &str,
        from_perspective_id: &str,
        config: &MergeConfig,
    ) -> Result<String> {
        let key = (to_perspective_id.to_owned(), from_perspective_id.to_owned());
        if !self.state().in_progress.insert(key.clone()) {
            return Err(EveesError::CycleDetected(to_perspective_id.to_owned()));
        }

        let result = self
            .strategy
            .merge_perspectives(to_perspective_id, from_perspective_id, config, self)
            .await;

        self.state().in_progress.remove(&key);
        result
    }

    async fn resolve(&self, merge_id: String, config: &MergeConfig) -> Result<String> {
        let Some(pair) = self.pair(&merge_id) else {
            return Ok(merge_id);
        };

        match (pair.to, pair.from) {
            (Some(to), Some(from)) => {
                self.merge_perspectives(&to, &from, config).await?;
                Ok(to)
            }
            (Some(to), None) => Ok(to),
            (None, Some(from)) if config.force_owner => {
                let parent_id = config.parent_id.as_deref().ok_or_else(|| {
                    EveesError::Precondition("forcing owner requires a parent perspective".into())
                })?;
                let remote = self.evees().get_perspective_remote(parent_id).await?;
                let options = ForkOptions {
                    recurse: true,
                    detach: config.detach.unwrap_or(false),
                };
                let fork_id = self
                    .evees()
                    .fork_perspective(&from, Some(remote.id()), Some(parent_id), options)
                    .await?;
                debug!(from = %from, fork_id = %fork_id, parent_id, "forked perspective into target");
                Ok(fork_id)
            }
            (None, Some(from)) => Ok(from),
            (None, None) => Ok(merge_id),
        }
    }
}

#[async_trait]
impl LinkMerger for MergeSession<'_> {
    async fn merge_links(
        &self,
        original: &[String],
        modifications: &[Vec<String>],
        config: &MergeConfig,
    ) -> Result<Vec<String>> {
        let mut original_ids = Vec::with_capacity(original.len());
        for link in original {
            original_ids.push(self.merge_id(link).await?);
        }
        let mut modification_ids = Vec::with_capacity(modifications.len());
        for links in modifications {
            let mut ids = Vec::with_capacity(links.len());
            for link in links {
                ids.push(self.merge_id(link).await?);
            }
            modification_ids.push(ids);
        }

        let merged = merge_arrays(&original_ids, &modification_ids);

        let mut links = Vec::with_capacity(merged.len());
        for merge_id in merged {
            links.push(self.resolve(merge_id, config).await?);
        }
        Ok(links)
    }
}
