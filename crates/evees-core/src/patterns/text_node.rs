use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Capability, HasChildren, HasLinks, HasText, HasTitle, Mergeable, Pattern};
use crate::error::{EveesError, Result};
use crate::merge::utils::{merge_result, merge_strings};
use crate::merge::{LinkMerger, MergeConfig};

/// A block of text with an ordered list of child links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub links: Vec<String>,
}

impl TextNode {
    #[must_use]
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            node_type: "Paragraph".to_owned(),
            links: Vec::new(),
        }
    }

    #[must_use]
    pub fn title(text: impl Into<String>, links: Vec<String>) -> Self {
        Self {
            text: text.into(),
            node_type: "Title".to_owned(),
            links,
        }
    }
}

pub struct TextNodePattern;

fn parse(object: &Value) -> Result<TextNode> {
    serde_json::from_value(object.clone())
        .map_err(|err| EveesError::Conflict(format!("expected a text node: {err}")))
}

fn links(object: &Value) -> Vec<String> {
    parse(object).map(|node| node.links).unwrap_or_default()
}

impl HasChildren for TextNodePattern {
    fn children(&self, object: &Value) -> Vec<String> {
        links(object)
    }

    fn replace_children(&self, object: &Value, children: Vec<String>) -> Value {
        let mut object = object.clone();
        object["links"] = Value::from(children);
        object
    }
}

impl HasLinks for TextNodePattern {
    fn links_to(&self, object: &Value) -> Vec<String> {
        links(object)
    }
}

impl HasText for TextNodePattern {
    fn text(&self, object: &Value) -> String {
        object["text"].as_str().unwrap_or_default().to_owned()
    }
}

impl HasTitle for TextNodePattern {
    fn title(&self, object: &Value) -> String {
        self.text(object)
    }
}

#[async_trait]
impl Mergeable for TextNodePattern {
    async fn merge(
        &self,
        original: &Value,
        modifications: &[Value],
        merger: &dyn LinkMerger,
        config: &MergeConfig,
    ) -> Result<Value> {
        let original = parse(original)?;
        let modifications = modifications.iter().map(parse).collect::<Result<Vec<_>>>()?;

        let texts: Vec<String> = modifications.iter().map(|n| n.text.clone()).collect();
        let types: Vec<String> = modifications.iter().map(|n| n.node_type.clone()).collect();
        let links: Vec<Vec<String>> = modifications.into_iter().map(|n| n.links).collect();

        let merged = TextNode {
            text: merge_strings(&original.text, &texts),
            node_type: merge_result(&original.node_type, &types),
            links: merger.merge_links(&original.links, &links, config).await?,
        };
        Ok(serde_json::to_value(merged)?)
    }
}

impl Pattern for TextNodePattern {
    fn kind(&self) -> &'static str {
        "TextNode"
    }

    fn recognize(&self, object: &Value) -> bool {
        object.get("text").is_some_and(Value::is_string)
            && object.get("type").is_some_and(Value::is_string)
            && object.get("links").is_some_and(Value::is_array)
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Children(Arc::new(Self)),
            Capability::LinksTo(Arc::new(Self)),
            Capability::Text(Arc::new(Self)),
            Capability::Title(Arc::new(Self)),
            Capability::Merge(Arc::new(Self)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternRecognizer;
    use serde_json::json;

    #[test]
    fn serializes_type_field() {
        let value = serde_json::to_value(TextNode::paragraph("hi")).unwrap();
        assert_eq!(value, json!({"text": "hi", "type": "Paragraph", "links": []}));
    }

    #[test]
    fn exposes_text_and_title() {
        let recognizer = PatternRecognizer::with_defaults();
        let node = serde_json::to_value(TextNode::title("Home", vec!["a".into()])).unwrap();
        assert_eq!(recognizer.text(&node).unwrap(), "Home");
        assert_eq!(recognizer.title(&node).unwrap(), "Home");
        assert_eq!(recognizer.children(&node).unwrap(), vec!["a"]);
    }
}
