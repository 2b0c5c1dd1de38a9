use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Capability, HasChildren, HasTitle, Mergeable, Pattern};
use crate::error::{EveesError, Result};
use crate::merge::utils::merge_strings;
use crate::merge::{LinkMerger, MergeConfig};

/// A titled list of pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wiki {
    pub title: String,
    pub pages: Vec<String>,
}

pub struct WikiPattern;

fn parse(object: &Value) -> Result<Wiki> {
    serde_json::from_value(object.clone())
        .map_err(|err| EveesError::Conflict(format!("expected a wiki: {err}")))
}

impl HasChildren for WikiPattern {
    fn children(&self, object: &Value) -> Vec<String> {
        parse(object).map(|w| w.pages).unwrap_or_default()
    }

    fn replace_children(&self, object: &Value, children: Vec<String>) -> Value {
        let mut object = object.clone();
        object["pages"] = Value::from(children);
        object
    }
}

impl HasTitle for WikiPattern {
    fn title(&self, object: &Value) -> String {
        object["title"].as_str().unwrap_or_default().to_owned()
    }
}

#[async_trait]
impl Mergeable for WikiPattern {
    async fn merge(
        &self,
        original: &Value,
        modifications: &[Value],
        merger: &dyn LinkMerger,
        config: &MergeConfig,
    ) -> Result<Value> {
        let original = parse(original)?;
        let modifications = modifications.iter().map(parse).collect::<Result<Vec<_>>>()?;

        let titles: Vec<String> = modifications.iter().map(|w| w.title.clone()).collect();
        let pages: Vec<Vec<String>> = modifications.into_iter().map(|w| w.pages).collect();

        let merged = Wiki {
            title: merge_strings(&original.title, &titles),
            pages: merger.merge_links(&original.pages, &pages, config).await?,
        };
        Ok(serde_json::to_value(merged)?)
    }
}

impl Pattern for WikiPattern {
    fn kind(&self) -> &'static str {
        "Wiki"
    }

    fn recognize(&self, object: &Value) -> bool {
        object.get("title").is_some_and(Value::is_string)
            && object.get("pages").is_some_and(Value::is_array)
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Children(Arc::new(Self)),
            Capability::Title(Arc::new(Self)),
            Capability::Merge(Arc::new(Self)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_arrays;
    use serde_json::json;

    struct ArrayLinks;

    #[async_trait]
    impl LinkMerger for ArrayLinks {
        async fn merge_links(
            &self,
            original: &[String],
            modifications: &[Vec<String>],
            _config: &MergeConfig,
        ) -> Result<Vec<String>> {
            Ok(merge_arrays(original, modifications))
        }
    }

    #[tokio::test]
    async fn merges_title_and_pages() {
        let merged = WikiPattern
            .merge(
                &json!({"title": "Notes", "pages": ["a"]}),
                &[
                    json!({"title": "My Notes", "pages": ["a"]}),
                    json!({"title": "Notes", "pages": ["a", "b"]}),
                ],
                &ArrayLinks,
                &MergeConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(merged, json!({"title": "My Notes", "pages": ["a", "b"]}));
    }

    #[tokio::test]
    async fn merging_a_foreign_shape_is_a_conflict() {
        let err = WikiPattern
            .merge(
                &json!({"title": "Notes", "pages": []}),
                &[json!({"text": "not a wiki"})],
                &ArrayLinks,
                &MergeConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EveesError::Conflict(_)));
    }
}
