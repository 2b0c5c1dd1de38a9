//! Cache layering: invalidation through the event chain, slice absorption,
//! pending-write precedence and flush preconditions.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{local_stack, paragraph};
use evees_core::cas::{CasOnMemory, CasStore, CidConfig, EntityCreate};
use evees_core::client::{Client, ClientCache, ClientCachedWithBase, ClientEvents};
use evees_core::config::EveesConfig;
use evees_core::error::{EveesError, Result};
use evees_core::types::{
    CreateEvee, EveesMutation, EveesMutationCreate, GetPerspectiveOptions, PerspectiveAndDetails,
    PerspectiveDetails, PerspectiveGetResult, Slice, Update, UpdatePerspectiveData,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Stub base
// ---------------------------------------------------------------------------

/// Base client that answers every read with a fixed head and a slice, and
/// records every mutation pushed into it.
struct SliceBase {
    store: Arc<dyn CasStore>,
    events: Arc<ClientEvents>,
    slice: Slice,
    reads: AtomicUsize,
    received: Mutex<Vec<EveesMutationCreate>>,
    update_delay: Duration,
}

impl SliceBase {
    fn new(slice: Slice) -> Self {
        Self {
            store: Arc::new(CasOnMemory::new(CidConfig::default())),
            events: Arc::new(ClientEvents::default()),
            slice,
            reads: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            update_delay: Duration::ZERO,
        }
    }

    fn slow(slice: Slice, update_delay: Duration) -> Self {
        Self {
            update_delay,
            ..Self::new(slice)
        }
    }

    fn received_ids(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .flat_map(|mutation| mutation.updates.iter().map(|u| u.perspective_id.clone()))
            .collect()
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Client for SliceBase {
    fn name(&self) -> &str {
        "slice-base"
    }

    fn store(&self) -> Arc<dyn CasStore> {
        self.store.clone()
    }

    fn events(&self) -> Arc<ClientEvents> {
        self.events.clone()
    }

    async fn get_perspective(
        &self,
        perspective_id: &str,
        _options: GetPerspectiveOptions,
    ) -> Result<PerspectiveGetResult> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(PerspectiveGetResult {
            details: PerspectiveDetails::with_head(format!("head-of-{perspective_id}")),
            slice: Some(self.slice.clone()),
        })
    }

    async fn update(&self, mutation: EveesMutationCreate) -> Result<()> {
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        self.received.lock().unwrap().push(mutation);
        Ok(())
    }

    async fn can_update(&self, _perspective_id: &str, _user_id: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn diff(&self) -> Result<EveesMutation> {
        Ok(EveesMutation::default())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn get_user_perspectives(&self, _perspective_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn child_slice() -> Slice {
    Slice {
        perspectives: vec![PerspectiveAndDetails {
            id: "child".into(),
            details: PerspectiveDetails::with_head("sliced-child-head"),
        }],
        entities: Vec::new(),
    }
}

fn cached_over(base: Arc<SliceBase>) -> ClientCachedWithBase {
    let store: Arc<dyn CasStore> = Arc::new(CasOnMemory::new(CidConfig::default()));
    ClientCachedWithBase::on_memory("cached", store, Some(base))
}

// ---------------------------------------------------------------------------
// Slices and levels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slice_perspectives_are_served_from_cache() {
    let base = Arc::new(SliceBase::new(child_slice()));
    let client = cached_over(base.clone());

    let root = client
        .get_perspective("root", GetPerspectiveOptions::levels(1))
        .await
        .unwrap();
    assert_eq!(root.details.head_id.as_deref(), Some("head-of-root"));
    assert!(root.slice.is_none(), "slices are absorbed, not forwarded");
    assert_eq!(base.reads(), 1);

    let child = client
        .get_perspective("child", GetPerspectiveOptions::levels(1))
        .await
        .unwrap();
    assert_eq!(child.details.head_id.as_deref(), Some("sliced-child-head"));
    assert_eq!(base.reads(), 1);

    // no depth requested: any cached entry will do
    client
        .get_perspective("root", GetPerspectiveOptions::default())
        .await
        .unwrap();
    assert_eq!(base.reads(), 1);

    // a different depth is a miss
    client
        .get_perspective("root", GetPerspectiveOptions::levels(0))
        .await
        .unwrap();
    assert_eq!(base.reads(), 2);
}

#[tokio::test]
async fn slice_entities_land_in_the_layer_store() {
    let hasher = CasOnMemory::new(CidConfig::default());
    let entity = hasher
        .hash_entity(&EntityCreate::new(json!({"text": "sliced", "type": "Paragraph", "links": []})))
        .await
        .unwrap();

    let base = Arc::new(SliceBase::new(Slice {
        perspectives: Vec::new(),
        entities: vec![entity.clone()],
    }));
    let client = cached_over(base);

    client
        .get_perspective("root", GetPerspectiveOptions::levels(-1))
        .await
        .unwrap();
    assert_eq!(client.store().get_entity(&entity.id).await.unwrap(), entity);
}

#[tokio::test]
async fn disabled_cache_always_reads_through() {
    let base = Arc::new(SliceBase::new(child_slice()));
    let client = cached_over(base.clone()).with_cache_enabled(false);

    for _ in 0..3 {
        client
            .get_perspective("root", GetPerspectiveOptions::levels(1))
            .await
            .unwrap();
    }
    assert_eq!(base.reads(), 3);
    assert!(client.cache().get_cached_perspective("root").is_none());
}

// ---------------------------------------------------------------------------
// Pending writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_updates_win_until_flushed() {
    let base = Arc::new(SliceBase::new(Slice::default()));
    let client = cached_over(base.clone());

    client
        .update_perspective(Update::head("root", "local-head"))
        .await
        .unwrap();

    let read = client
        .get_perspective("root", GetPerspectiveOptions::levels(0))
        .await
        .unwrap();
    assert_eq!(read.details.head_id.as_deref(), Some("local-head"));

    let diff = client.diff().await.unwrap();
    assert_eq!(diff.updates.len(), 1);
    assert_eq!(diff.updates[0].details.head_id.as_deref(), Some("local-head"));

    client.flush().await.unwrap();
    {
        let received = base.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].updates[0].perspective_id, "root");
    }
    assert!(client.diff().await.unwrap().is_empty());

    // flushing again pushes nothing
    client.flush().await.unwrap();
    assert_eq!(base.received.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn updates_during_a_flush_wait_for_the_next_one() {
    let base = Arc::new(SliceBase::slow(Slice::default(), Duration::from_millis(50)));
    let client = cached_over(base.clone());
    client.update_perspective(Update::head("p1", "h1")).await.unwrap();

    let (flushed, updated) = tokio::join!(client.flush(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.update_perspective(Update::head("p2", "h1")).await
    });
    flushed.unwrap();
    updated.unwrap();

    assert_eq!(base.received_ids(), vec!["p1".to_owned()]);
    let diff = client.diff().await.unwrap();
    assert_eq!(diff.updates.len(), 1);
    assert_eq!(diff.updates[0].perspective_id, "p2");

    client.flush().await.unwrap();
    assert_eq!(base.received_ids(), vec!["p1".to_owned(), "p2".to_owned()]);
    assert!(client.diff().await.unwrap().is_empty());
}

#[tokio::test]
async fn successive_updates_are_folded() {
    let base = Arc::new(SliceBase::new(Slice::default()));
    let client = cached_over(base);

    client.update_perspective(Update::head("root", "h1")).await.unwrap();
    client.update_perspective(Update::head("root", "h2")).await.unwrap();

    let diff = client.diff().await.unwrap();
    assert_eq!(diff.updates.len(), 1);
    assert_eq!(diff.updates[0].details.head_id.as_deref(), Some("h2"));
}

#[tokio::test]
async fn deleted_perspectives_refuse_updates() {
    let base = Arc::new(SliceBase::new(Slice::default()));
    let client = cached_over(base);

    client.delete_perspective("root").await.unwrap();
    client.update_perspective(Update::head("root", "late")).await.unwrap();

    assert!(!client.can_update("root", None).await.unwrap());
    let diff = client.diff().await.unwrap();
    assert!(diff.updates.is_empty());
    assert_eq!(diff.deleted_perspectives, vec!["root"]);
}

#[tokio::test]
async fn flush_without_base_is_a_precondition_error() {
    let store: Arc<dyn CasStore> = Arc::new(CasOnMemory::new(CidConfig::default()));
    let client = ClientCachedWithBase::on_memory("root", store, None);

    let err = client.flush().await.unwrap_err();
    assert!(matches!(err, EveesError::Precondition(_)), "got {err:?}");

    // a root layer reads unknown perspectives as empty
    let read = client
        .get_perspective("nowhere", GetPerspectiveOptions::default())
        .await
        .unwrap();
    assert_eq!(read.details, PerspectiveDetails::default());
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_updates_evict_every_cache_layer() {
    let stack = local_stack(EveesConfig::default());
    let writer = &stack.evees;

    let pid = writer
        .create_evee(CreateEvee {
            object: Some(paragraph("one")),
            ..CreateEvee::default()
        })
        .await
        .unwrap();
    writer.flush().await.unwrap();

    let reader_store: Arc<dyn CasStore> = Arc::new(CasOnMemory::with_base(stack.router.clone()));
    let reader = ClientCachedWithBase::on_memory("reader", reader_store, Some(stack.base.clone()));
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = seen.clone();
    reader
        .events()
        .subscribe(move |ids| sink.lock().unwrap().extend(ids.iter().cloned()));

    let before = reader
        .get_perspective(&pid, GetPerspectiveOptions::default())
        .await
        .unwrap()
        .details
        .head_id;
    assert!(before.is_some());

    writer
        .update_perspective_data(UpdatePerspectiveData::new(&pid, paragraph("two")))
        .await
        .unwrap();
    writer.flush().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![pid.clone()]);

    let after = reader
        .get_perspective(&pid, GetPerspectiveOptions::default())
        .await
        .unwrap()
        .details
        .head_id;
    assert_ne!(after, before);

    let data = writer.get_perspective_data(&pid).await.unwrap();
    assert_eq!(data.object["text"], "two");
}

#[tokio::test]
async fn dropped_layers_unsubscribe_from_their_base() {
    let stack = local_stack(EveesConfig::default());
    let listeners = stack.base.events().listener_count();

    let store: Arc<dyn CasStore> = Arc::new(CasOnMemory::with_base(stack.router.clone()));
    let layer = ClientCachedWithBase::on_memory("short-lived", store, Some(stack.base.clone()));
    assert_eq!(stack.base.events().listener_count(), listeners + 1);

    drop(layer);
    assert_eq!(stack.base.events().listener_count(), listeners);
}
