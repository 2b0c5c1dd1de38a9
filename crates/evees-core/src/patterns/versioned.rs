//! Patterns for the versioning objects themselves.

use std::sync::Arc;

use serde_json::Value;

use super::{Capability, HasLinks, Pattern};

fn payload(object: &Value) -> Option<&serde_json::Map<String, Value>> {
    object.get("proof")?;
    object.get("payload")?.as_object()
}

/// Signed perspective objects.
pub struct PerspectivePattern;

impl Pattern for PerspectivePattern {
    fn kind(&self) -> &'static str {
        "Perspective"
    }

    fn recognize(&self, object: &Value) -> bool {
        payload(object).is_some_and(|p| {
            ["remote", "path", "creatorId", "context", "timestamp"]
                .iter()
                .all(|key| p.contains_key(*key))
        })
    }

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }
}

/// Signed commit objects.
pub struct CommitPattern;

impl HasLinks for CommitPattern {
    /// Parents first, then the data.
    fn links_to(&self, object: &Value) -> Vec<String> {
        let Some(p) = payload(object) else {
            return Vec::new();
        };
        let mut links: Vec<String> = p
            .get("parentsIds")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect();
        if let Some(data_id) = p.get("dataId").and_then(Value::as_str) {
            links.push(data_id.to_owned());
        }
        links
    }
}

impl Pattern for CommitPattern {
    fn kind(&self) -> &'static str {
        "Commit"
    }

    fn recognize(&self, object: &Value) -> bool {
        payload(object).is_some_and(|p| p.contains_key("dataId") && p.contains_key("parentsIds"))
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::LinksTo(Arc::new(Self))]
    }
}
