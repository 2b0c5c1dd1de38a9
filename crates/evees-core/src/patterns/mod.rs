//! Pattern registry.
//!
//! A [`Pattern`] recognizes a shape of JSON object and exposes typed
//! [`Capability`] objects for it. The [`PatternRecognizer`] answers which
//! patterns an object matches and which capabilities it has.

pub mod text_node;
pub mod versioned;
pub mod wiki;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{BehaviorNotFoundKind, EveesError, Result};
use crate::merge::{LinkMerger, MergeConfig};

pub use text_node::{TextNode, TextNodePattern};
pub use versioned::{CommitPattern, PerspectivePattern};
pub use wiki::{Wiki, WikiPattern};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub trait HasChildren: Send + Sync {
    fn children(&self, object: &Value) -> Vec<String>;

    fn replace_children(&self, object: &Value, children: Vec<String>) -> Value;
}

pub trait HasLinks: Send + Sync {
    fn links_to(&self, object: &Value) -> Vec<String>;
}

pub trait HasText: Send + Sync {
    fn text(&self, object: &Value) -> String;
}

pub trait HasTitle: Send + Sync {
    fn title(&self, object: &Value) -> String;
}

/// Three-way merge of an object's data.
#[async_trait]
pub trait Mergeable: Send + Sync {
    async fn merge(
        &self,
        original: &Value,
        modifications: &[Value],
        merger: &dyn LinkMerger,
        config: &MergeConfig,
    ) -> Result<Value>;
}

/// Behavior names capabilities can be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    Children,
    ReplaceChildren,
    LinksTo,
    Text,
    Title,
    Merge,
}

impl Behavior {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Children => "children",
            Self::ReplaceChildren => "replaceChildren",
            Self::LinksTo => "linksTo",
            Self::Text => "text",
            Self::Title => "title",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub enum Capability {
    /// Also provides `replaceChildren`.
    Children(Arc<dyn HasChildren>),
    LinksTo(Arc<dyn HasLinks>),
    Text(Arc<dyn HasText>),
    Title(Arc<dyn HasTitle>),
    Merge(Arc<dyn Mergeable>),
}

impl Capability {
    #[must_use]
    pub const fn implements(&self, behavior: Behavior) -> bool {
        matches!(
            (self, behavior),
            (Self::Children(_), Behavior::Children | Behavior::ReplaceChildren)
                | (Self::LinksTo(_), Behavior::LinksTo)
                | (Self::Text(_), Behavior::Text)
                | (Self::Title(_), Behavior::Title)
                | (Self::Merge(_), Behavior::Merge)
        )
    }

    /// Link list exposed by a list-valued capability.
    fn links(&self, object: &Value) -> Vec<String> {
        match self {
            Self::Children(c) => c.children(object),
            Self::LinksTo(l) => l.links_to(object),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Children(_) => "Children",
            Self::LinksTo(_) => "LinksTo",
            Self::Text(_) => "Text",
            Self::Title(_) => "Title",
            Self::Merge(_) => "Merge",
        };
        f.debug_tuple(name).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub trait Pattern: Send + Sync {
    /// Type name reported by [`PatternRecognizer::recognize_type`].
    fn kind(&self) -> &'static str;

    fn recognize(&self, object: &Value) -> bool;

    fn capabilities(&self) -> Vec<Capability>;
}

#[derive(Clone, Default)]
pub struct PatternRecognizer {
    patterns: Vec<Arc<dyn Pattern>>,
}

impl PatternRecognizer {
    #[must_use]
    pub fn new(patterns: Vec<Arc<dyn Pattern>>) -> Self {
        Self { patterns }
    }

    /// Perspective, Commit, Wiki and `TextNode`.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Arc::new(PerspectivePattern),
            Arc::new(CommitPattern),
            Arc::new(WikiPattern),
            Arc::new(TextNodePattern),
        ])
    }

    pub fn register(&mut self, pattern: Arc<dyn Pattern>) {
        self.patterns.push(pattern);
    }

    pub fn recognize<'a>(&'a self, object: &'a Value) -> impl Iterator<Item = &'a Arc<dyn Pattern>> + 'a {
        self.patterns.iter().filter(move |p| p.recognize(object))
    }

    #[must_use]
    pub fn recognize_type(&self, object: &Value) -> Option<String> {
        self.recognize(object).next().map(|p| p.kind().to_owned())
    }

    /// `None` when no pattern contributes any capability to the object.
    #[must_use]
    pub fn recognize_behaviors(&self, object: &Value) -> Option<Vec<Capability>> {
        let capabilities: Vec<Capability> =
            self.recognize(object).flat_map(|p| p.capabilities()).collect();
        (!capabilities.is_empty()).then_some(capabilities)
    }

    /// Every capability of `object` implementing `behavior`.
    pub fn behaviors(&self, object: &Value, behavior: Behavior) -> Result<Vec<Capability>> {
        let Some(all) = self.recognize_behaviors(object) else {
            return Err(EveesError::BehaviorNotFound {
                kind: BehaviorNotFoundKind::NoBehaviors,
                message: format!("No behaviors found for object while looking for {behavior}"),
            });
        };
        let matching: Vec<Capability> = all.into_iter().filter(|c| c.implements(behavior)).collect();
        if matching.is_empty() {
            return Err(EveesError::BehaviorNotFound {
                kind: BehaviorNotFoundKind::MissingBehavior,
                message: format!("Behavior {behavior} not found"),
            });
        }
        Ok(matching)
    }

    #[must_use]
    pub fn has_behavior(&self, object: &Value, behavior: Behavior) -> bool {
        self.behaviors(object, behavior).is_ok()
    }

    pub fn behavior_first(&self, object: &Value, behavior: Behavior) -> Result<Capability> {
        let mut matching = self.behaviors(object, behavior)?;
        Ok(matching.swap_remove(0))
    }

    /// Concatenated links of every list-valued capability, deduplicated in
    /// first-seen order.
    pub fn behavior_concat(&self, object: &Value, behavior: Behavior) -> Result<Vec<String>> {
        let mut links: Vec<String> = Vec::new();
        for capability in self.behaviors(object, behavior)? {
            for link in capability.links(object) {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        Ok(links)
    }

    pub fn children(&self, object: &Value) -> Result<Vec<String>> {
        self.behavior_concat(object, Behavior::Children)
    }

    pub fn links_to(&self, object: &Value) -> Result<Vec<String>> {
        self.behavior_concat(object, Behavior::LinksTo)
    }

    pub fn replace_children(&self, object: &Value, children: Vec<String>) -> Result<Value> {
        match self.behavior_first(object, Behavior::ReplaceChildren)? {
            Capability::Children(c) => Ok(c.replace_children(object, children)),
            other => Err(unexpected(&other, Behavior::ReplaceChildren)),
        }
    }

    pub fn text(&self, object: &Value) -> Result<String> {
        match self.behavior_first(object, Behavior::Text)? {
            Capability::Text(t) => Ok(t.text(object)),
            other => Err(unexpected(&other, Behavior::Text)),
        }
    }

    pub fn title(&self, object: &Value) -> Result<String> {
        match self.behavior_first(object, Behavior::Title)? {
            Capability::Title(t) => Ok(t.title(object)),
            other => Err(unexpected(&other, Behavior::Title)),
        }
    }

    pub fn merger(&self, object: &Value) -> Result<Arc<dyn Mergeable>> {
        match self.behavior_first(object, Behavior::Merge)? {
            Capability::Merge(m) => Ok(m),
            other => Err(unexpected(&other, Behavior::Merge)),
        }
    }
}

fn unexpected(capability: &Capability, behavior: Behavior) -> EveesError {
    EveesError::BehaviorNotFound {
        kind: BehaviorNotFoundKind::MissingBehavior,
        message: format!("{capability:?} does not provide {behavior}"),
    }
}
