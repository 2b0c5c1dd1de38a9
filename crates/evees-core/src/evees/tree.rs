//! Child-link tree operations.
//!
//! Every operation reads the current data of a perspective, splices the
//! array exposed by its `Children` capability and writes the result back
//! through `update_perspective_data`.

use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use super::Evees;
use crate::config::FlushConfig;
use crate::error::{EveesError, Result};
use crate::patterns::Behavior;
use crate::types::{CreateEvee, PerspectiveDetails, Update, UpdatePerspectiveData};

/// An element inserted by [`Evees::splice_children`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChildElement {
    /// Link an existing perspective.
    Existing(String),
    /// Create a new perspective holding this object and link it.
    New(Value),
}

impl From<&str> for ChildElement {
    fn from(id: &str) -> Self {
        Self::Existing(id.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpliceResult {
    pub object: Value,
    pub removed: Vec<String>,
}

/// How [`Evees::move_perspective`] addresses the moved child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    Id(String),
    Index(usize),
}

/// Array splice with out-of-range positions clamped to the array bounds.
pub(crate) fn splice_ids(
    children: &mut Vec<String>,
    index: usize,
    count: usize,
    inserted: Vec<String>,
) -> Vec<String> {
    let start = index.min(children.len());
    let end = start.saturating_add(count).min(children.len());
    children.splice(start..end, inserted).collect()
}

fn flush_now(flush: Option<&FlushConfig>) -> bool {
    flush.is_some_and(|flush| flush.autoflush)
}

impl Evees {
    /// Child ids of the perspective's data, or none if it has no head.
    pub async fn get_perspective_children(&self, perspective_id: &str) -> Result<Vec<String>> {
        match self.try_get_perspective_data(perspective_id).await? {
            Some(data) => self.behavior_concat(&data.object, Behavior::Children),
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_child_id(&self, perspective_id: &str, index: usize) -> Result<String> {
        let data = self.get_perspective_data(perspective_id).await?;
        self.behavior_concat(&data.object, Behavior::Children)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| EveesError::not_found("child", format!("{perspective_id}[{index}]")))
    }

    /// Position of `child_id` among the children of `perspective_id`.
    pub async fn get_child_index(&self, perspective_id: &str, child_id: &str) -> Result<Option<usize>> {
        let data = self.get_perspective_data(perspective_id).await?;
        let children = self.behavior_concat(&data.object, Behavior::Children)?;

        let mut matches = children
            .iter()
            .enumerate()
            .filter(|(_, id)| id.as_str() == child_id)
            .map(|(index, _)| index);
        let first = matches.next();
        if matches.next().is_some() {
            return Err(EveesError::AmbiguousChild {
                perspective_id: perspective_id.to_owned(),
                child_id: child_id.to_owned(),
            });
        }
        Ok(first)
    }

    /// Splice the children of `object`. New elements become perspectives on
    /// `remote_id` (or the default remote).
    pub async fn splice_children(
        &self,
        object: &Value,
        elements: Vec<ChildElement>,
        index: usize,
        count: usize,
        remote_id: Option<&str>,
    ) -> Result<SpliceResult> {
        let creates = elements
            .iter()
            .any(|element| matches!(element, ChildElement::New(_)));
        let remote_id = match remote_id {
            Some(remote_id) => Some(remote_id.to_owned()),
            None if creates => Some(self.get_remote(None)?.id().to_owned()),
            None => None,
        };

        let inserted = try_join_all(elements.into_iter().map(|element| {
            let remote_id = remote_id.clone();
            async move {
                match element {
                    ChildElement::Existing(id) => Ok(id),
                    ChildElement::New(object) => {
                        self.create_evee(CreateEvee {
                            remote_id,
                            object: Some(object),
                            ..CreateEvee::default()
                        })
                        .await
                    }
                }
            }
        }))
        .await?;

        let recognizer = self.recognizer();
        let mut children = recognizer.children(object)?;
        let removed = splice_ids(&mut children, index, count, inserted);
        let object = recognizer.replace_children(object, children)?;

        Ok(SpliceResult { object, removed })
    }

    /// Link an existing perspective under `parent_id` and optionally make
    /// the parent its guardian.
    pub async fn add_existing_child(
        &self,
        child_id: &str,
        parent_id: &str,
        index: usize,
        set_guardian: bool,
        flush: Option<FlushConfig>,
    ) -> Result<()> {
        let parent = self.get_perspective_data(parent_id).await?;
        let spliced = self
            .splice_children(&parent.object, vec![child_id.into()], index, 0, None)
            .await?;

        let now = flush_now(flush.as_ref());
        self.update_perspective_data(UpdatePerspectiveData {
            flush,
            ..UpdatePerspectiveData::new(parent_id, spliced.object)
        })
        .await?;

        if set_guardian {
            self.update_perspective(
                Update {
                    perspective_id: child_id.to_owned(),
                    details: PerspectiveDetails {
                        guardian_id: Some(parent_id.to_owned()),
                        ..PerspectiveDetails::default()
                    },
                    from_perspective_id: None,
                    old_head_id: None,
                    index_data: None,
                },
                now,
            )
            .await?;
        }
        Ok(())
    }

    /// Create a perspective guarded by `parent_id` and link it at `index`.
    pub async fn add_new_child(
        &self,
        parent_id: &str,
        object: Value,
        index: usize,
        flush: Option<FlushConfig>,
    ) -> Result<String> {
        let child_id = self
            .create_evee(CreateEvee {
                object: Some(object),
                guardian_id: Some(parent_id.to_owned()),
                ..CreateEvee::default()
            })
            .await?;
        self.add_existing_child(&child_id, parent_id, index, false, flush)
            .await?;
        Ok(child_id)
    }

    /// Unlink the child at `index`. Returns its id.
    pub async fn remove_child(
        &self,
        perspective_id: &str,
        index: usize,
        flush: Option<FlushConfig>,
    ) -> Result<String> {
        let data = self.get_perspective_data(perspective_id).await?;
        let spliced = self
            .splice_children(&data.object, Vec::new(), index, 1, None)
            .await?;
        let removed = spliced
            .removed
            .into_iter()
            .next()
            .ok_or_else(|| EveesError::not_found("child", format!("{perspective_id}[{index}]")))?;

        self.update_perspective_data(UpdatePerspectiveData {
            flush,
            ..UpdatePerspectiveData::new(perspective_id, spliced.object)
        })
        .await?;
        Ok(removed)
    }

    /// Move a child from `from_index` to `to_index`.
    ///
    /// This is a remove followed by an add. Another writer can change the
    /// children between the two steps.
    pub async fn move_child(
        &self,
        perspective_id: &str,
        from_index: usize,
        to_index: usize,
        flush: Option<FlushConfig>,
    ) -> Result<String> {
        let child_id = self
            .remove_child(perspective_id, from_index, flush.clone())
            .await?;
        self.add_existing_child(&child_id, perspective_id, to_index, false, flush)
            .await?;
        debug!(perspective_id, from_index, to_index, child_id = %child_id, "moved child");
        Ok(child_id)
    }

    /// Unlink the child at `index` and delete its perspective.
    pub async fn delete_child(&self, perspective_id: &str, index: usize) -> Result<String> {
        let child_id = self.remove_child(perspective_id, index, None).await?;
        self.delete_perspective(&child_id).await?;
        Ok(child_id)
    }

    /// Move a child of `from_id` under `to_id`.
    ///
    /// With `keep_in_from` the child stays linked in `from_id` too. The
    /// guardian is moved to `to_id` unless `keep_guardian` says otherwise; it
    /// defaults to `keep_in_from`.
    pub async fn move_perspective(
        &self,
        from_id: &str,
        child: ChildRef,
        to_id: &str,
        to_index: usize,
        keep_in_from: bool,
        keep_guardian: Option<bool>,
    ) -> Result<()> {
        let child_index = match child {
            ChildRef::Index(index) => index,
            ChildRef::Id(child_id) => self
                .get_child_index(from_id, &child_id)
                .await?
                .ok_or_else(|| EveesError::not_found("child", child_id))?,
        };

        let child_id = if keep_in_from {
            self.get_child_id(from_id, child_index).await?
        } else {
            self.remove_child(from_id, child_index, None).await?
        };

        let keep_guardian = keep_guardian.unwrap_or(keep_in_from);
        self.add_existing_child(&child_id, to_id, to_index, !keep_guardian, None)
            .await
    }
}
