//! Evees data model: perspectives, commits, updates and mutations.
//!
//! Wire names are camelCase so the canonical JSON of a perspective or commit
//! (and therefore its id) does not depend on Rust field naming.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cas::{Entity, EntityCreate, Secured};
use crate::config::FlushConfig;

/// Source of a fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkDetails {
    pub perspective_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forking: Option<ForkDetails>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perspective {
    pub remote: String,
    pub path: String,
    pub creator_id: String,
    pub context: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PerspectiveMeta>,
}

/// Perspective fields a caller may preset when snapping a new perspective.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPerspective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PerspectiveMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_id: Option<String>,
}

impl PerspectiveDetails {
    #[must_use]
    pub fn with_head(head_id: impl Into<String>) -> Self {
        Self {
            head_id: Some(head_id.into()),
            ..Self::default()
        }
    }

    /// Copy the defined fields of `update` over `self`.
    pub fn overlay(&mut self, update: &Self) {
        if update.head_id.is_some() {
            self.head_id.clone_from(&update.head_id);
        }
        if update.guardian_id.is_some() {
            self.guardian_id.clone_from(&update.guardian_id);
        }
        if update.can_update.is_some() {
            self.can_update = update.can_update;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub creators_ids: Vec<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forking: Option<String>,
    pub parents_ids: Vec<String>,
    pub data_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkChanges {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl LinkChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Side-channel data computed for indexers when a perspective moves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexData {
    /// Keyed by behavior name (`children`, `linksTo`).
    #[serde(default)]
    pub link_changes: BTreeMap<String, LinkChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub perspective_id: String,
    pub details: PerspectiveDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_perspective_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_head_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_data: Option<IndexData>,
}

impl Update {
    #[must_use]
    pub fn head(perspective_id: impl Into<String>, head_id: impl Into<String>) -> Self {
        Self {
            perspective_id: perspective_id.into(),
            details: PerspectiveDetails::with_head(head_id),
            from_perspective_id: None,
            old_head_id: None,
            index_data: None,
        }
    }

    /// Fold a later update to the same perspective into this one.
    pub fn absorb(&mut self, later: Self) {
        self.details.overlay(&later.details);
        if later.from_perspective_id.is_some() {
            self.from_perspective_id = later.from_perspective_id;
        }
        if later.index_data.is_some() {
            self.index_data = later.index_data;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPerspective {
    pub perspective: Secured<Perspective>,
    pub update: Update,
}

impl NewPerspective {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.perspective.id
    }
}

/// A set of not-yet-applied changes, as accepted by `Client::update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EveesMutationCreate {
    #[serde(default)]
    pub entities: Vec<EntityCreate>,
    #[serde(default)]
    pub new_perspectives: Vec<NewPerspective>,
    #[serde(default)]
    pub updates: Vec<Update>,
    #[serde(default)]
    pub deleted_perspectives: Vec<String>,
}

/// A set of changes with hashed entities, as reported by `diff`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EveesMutation {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub new_perspectives: Vec<NewPerspective>,
    #[serde(default)]
    pub updates: Vec<Update>,
    #[serde(default)]
    pub deleted_perspectives: Vec<String>,
}

impl EveesMutation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.new_perspectives.is_empty()
            && self.updates.is_empty()
            && self.deleted_perspectives.is_empty()
    }
}

impl EveesMutationCreate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.new_perspectives.is_empty()
            && self.updates.is_empty()
            && self.deleted_perspectives.is_empty()
    }
}

impl From<EveesMutation> for EveesMutationCreate {
    fn from(mutation: EveesMutation) -> Self {
        Self {
            entities: mutation.entities.iter().map(EntityCreate::from).collect(),
            new_perspectives: mutation.new_perspectives,
            updates: mutation.updates,
            deleted_perspectives: mutation.deleted_perspectives,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPerspectiveOptions {
    /// Sub-graph depth a base may pre-fetch. `-1` means unbounded.
    #[serde(default)]
    pub levels: Option<i32>,
}

impl GetPerspectiveOptions {
    #[must_use]
    pub const fn levels(levels: i32) -> Self {
        Self {
            levels: Some(levels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveAndDetails {
    pub id: String,
    pub details: PerspectiveDetails,
}

/// A pre-fetched sub-graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    #[serde(default)]
    pub perspectives: Vec<PerspectiveAndDetails>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveGetResult {
    pub details: PerspectiveDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<Slice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCommit {
    pub data_id: String,
    pub parents_ids: Vec<String>,
    pub creators_ids: Vec<String>,
    pub message: Option<String>,
    pub timestamp: Option<i64>,
    pub forking: Option<String>,
}

/// Input of `Evees::create_evee`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateEvee {
    pub remote_id: Option<String>,
    pub object: Option<Value>,
    pub partial_perspective: Option<PartialPerspective>,
    pub guardian_id: Option<String>,
    /// Reuse an already snapped perspective instead of snapping one.
    pub perspective_id: Option<String>,
    pub index_data: Option<IndexData>,
}

/// Input of `Evees::update_perspective_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePerspectiveData {
    pub perspective_id: String,
    pub object: Value,
    pub flush: Option<FlushConfig>,
    pub on_head_id: Option<String>,
    pub guardian_id: Option<String>,
    pub index_data: Option<IndexData>,
}

impl UpdatePerspectiveData {
    #[must_use]
    pub fn new(perspective_id: impl Into<String>, object: Value) -> Self {
        Self {
            perspective_id: perspective_id.into(),
            object,
            flush: None,
            on_head_id: None,
            guardian_id: None,
            index_data: None,
        }
    }

    #[must_use]
    pub fn with_flush(mut self, flush: FlushConfig) -> Self {
        self.flush = Some(flush);
        self
    }
}

/// One updated perspective found by diff exploration.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDetails {
    /// Perspective ids from the exploration root down to this perspective.
    pub path: Vec<String>,
    pub new_data: Entity,
    pub old_data: Option<Entity>,
    pub update: Update,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn perspective_uses_camel_case_wire_names() {
        let perspective = Perspective {
            remote: "local".into(),
            path: String::new(),
            creator_id: "alice".into(),
            context: "alice.home".into(),
            timestamp: 0,
            meta: None,
        };
        assert_eq!(
            serde_json::to_value(&perspective).unwrap(),
            json!({
                "remote": "local",
                "path": "",
                "creatorId": "alice",
                "context": "alice.home",
                "timestamp": 0
            })
        );
    }

    #[test]
    fn meta_keeps_unknown_fields() {
        let meta: PerspectiveMeta = serde_json::from_value(json!({
            "forking": {"perspectiveId": "p1", "headId": "h1"},
            "name": "draft"
        }))
        .unwrap();
        assert_eq!(meta.forking.as_ref().unwrap().perspective_id, "p1");
        assert_eq!(meta.extra.get("name"), Some(&json!("draft")));
    }

    #[test]
    fn overlay_only_copies_defined_fields() {
        let mut details = PerspectiveDetails {
            head_id: Some("h1".into()),
            can_update: Some(true),
            guardian_id: Some("g1".into()),
        };
        details.overlay(&PerspectiveDetails::with_head("h2"));
        assert_eq!(details.head_id.as_deref(), Some("h2"));
        assert_eq!(details.guardian_id.as_deref(), Some("g1"));
        assert_eq!(details.can_update, Some(true));
    }

    #[test]
    fn absorbed_update_keeps_earlier_guardian() {
        let mut update = Update {
            details: PerspectiveDetails {
                guardian_id: Some("g".into()),
                ..PerspectiveDetails::default()
            },
            ..Update::head("p", "h1")
        };
        update.absorb(Update::head("p", "h2"));
        assert_eq!(update.details.head_id.as_deref(), Some("h2"));
        assert_eq!(update.details.guardian_id.as_deref(), Some("g"));
    }

    #[test]
    fn mutation_emptiness() {
        assert!(EveesMutation::default().is_empty());
        let mutation = EveesMutation {
            deleted_perspectives: vec!["p".into()],
            ..EveesMutation::default()
        };
        assert!(!mutation.is_empty());
        assert!(!EveesMutationCreate::from(mutation).is_empty());
    }
}
