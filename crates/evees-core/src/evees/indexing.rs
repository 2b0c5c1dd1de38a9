//! Index data attached to updates.
//!
//! Before an update leaves the service it is annotated with the link
//! changes (`children`, `linksTo`) between the new head's data and the data
//! of its first parent, and with the text of the new data.

use serde_json::Value;

use super::Evees;
use crate::cas::{Entity, Secured};
use crate::error::Result;
use crate::merge::array_diff;
use crate::patterns::Behavior;
use crate::types::{Commit, IndexData, Update};

/// Turn a capability miss into `None`.
pub(crate) fn soft<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_behavior_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

impl Evees {
    /// Annotate `update` with link changes and text of its new head.
    pub async fn append_indexing(&self, mut update: Update) -> Result<Update> {
        let Some(head_id) = update.details.head_id.clone() else {
            return Ok(update);
        };

        let store = self.store();
        let head: Secured<Commit> = store.get_entity(&head_id).await?.decode()?;
        let data = store.get_entity(&head.payload().data_id).await?;
        let old_data: Option<Entity> = match head.payload().parents_ids.first() {
            Some(parent_id) => {
                let parent: Secured<Commit> = store.get_entity(parent_id).await?.decode()?;
                Some(store.get_entity(&parent.payload().data_id).await?)
            }
            None => None,
        };
        let old_object = old_data.as_ref().map(|entity| &entity.object);

        for behavior in [Behavior::Children, Behavior::LinksTo] {
            self.check_links(&mut update, behavior, &data.object, old_object)?;
        }
        self.check_text(&mut update, &data.object)?;
        Ok(update)
    }

    fn check_links(
        &self,
        update: &mut Update,
        behavior: Behavior,
        new_object: &Value,
        old_object: Option<&Value>,
    ) -> Result<()> {
        let Some(links) = soft(self.behavior_concat(new_object, behavior))? else {
            return Ok(());
        };
        let old_links = match old_object {
            Some(old) => soft(self.behavior_concat(old, behavior))?.unwrap_or_default(),
            None => Vec::new(),
        };

        let changes = array_diff(&old_links, &links);
        update
            .index_data
            .get_or_insert_with(IndexData::default)
            .link_changes
            .insert(behavior.name().to_owned(), changes);
        Ok(())
    }

    fn check_text(&self, update: &mut Update, object: &Value) -> Result<()> {
        if let Some(text) = soft(self.recognizer().text(object))? {
            update.index_data.get_or_insert_with(IndexData::default).text = Some(text);
        }
        Ok(())
    }
}
