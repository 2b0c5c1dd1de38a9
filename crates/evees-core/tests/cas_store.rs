mod common;

use std::sync::Arc;

use evees_core::cas::{
    CasOnMemory, CasRemote, CasRouter, CasStore, CidConfig, EntityCreate, MemoryCasRemote, hash_object,
};
use evees_core::error::ErrorCode;
use serde_json::json;

#[test]
fn ids_do_not_depend_on_key_order() {
    let a = json!({"title": "Page", "pages": ["x", "y"], "meta": {"b": 1, "a": 2}});
    let b: serde_json::Value =
        serde_json::from_str(r#"{"meta":{"a":2,"b":1},"pages":["x","y"],"title":"Page"}"#).unwrap();

    for config in [CidConfig::default(), CidConfig::blake3(), CidConfig::v0()] {
        let first = hash_object(&a, &config).unwrap();
        assert_eq!(first, hash_object(&a, &config).unwrap());
        assert_eq!(first, hash_object(&b, &config).unwrap());
        assert_eq!(CidConfig::from_id(&first).unwrap(), config);
    }
}

#[test]
fn configs_produce_distinct_ids() {
    let object = json!({"text": "hello"});
    let sha = hash_object(&object, &CidConfig::default()).unwrap();
    let blake = hash_object(&object, &CidConfig::blake3()).unwrap();
    assert_ne!(sha, blake);
}

#[tokio::test]
async fn storing_twice_yields_one_record() {
    common::init_tracing();
    let cas = Arc::new(MemoryCasRemote::new("memory"));
    let router = CasRouter::new(vec![cas.clone() as Arc<dyn CasRemote>]);

    let draft = EntityCreate::new(json!({"text": "same", "type": "Paragraph", "links": []}));
    let first = router.store_entity(&draft).await.unwrap();
    let second = router.store_entity(&draft).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(cas.len(), 1);
    assert_eq!(first.cas_id.as_deref(), Some("memory"));
}

#[tokio::test]
async fn tampered_objects_are_rejected_on_read() {
    common::init_tracing();
    let cas = Arc::new(MemoryCasRemote::new("memory"));
    let router = CasRouter::new(vec![cas.clone() as Arc<dyn CasRemote>]);

    let entity = router
        .store_entity(&EntityCreate::new(json!({"text": "original"})))
        .await
        .unwrap();
    cas.tamper(&entity.id, json!({"text": "forged"}));

    let err = router.get_entity(&entity.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::HashMismatch);
}

#[tokio::test]
async fn memory_layer_batches_writes_until_flush() {
    common::init_tracing();
    let cas = Arc::new(MemoryCasRemote::new("memory"));
    let router: Arc<dyn CasStore> = Arc::new(CasRouter::new(vec![cas.clone() as Arc<dyn CasRemote>]));
    let memory = CasOnMemory::with_base(router);

    let drafts: Vec<EntityCreate> = (0..3)
        .map(|i| EntityCreate::new(json!({"n": i})))
        .collect();
    let stored = memory.store_entities(&drafts).await.unwrap();
    assert_eq!(memory.pending_len(), 3);
    assert!(cas.is_empty());

    // readable before the flush
    let read = memory.get_entity(&stored[1].id).await.unwrap();
    assert_eq!(read.object, json!({"n": 1}));
    assert_eq!(memory.diff().await.unwrap().len(), 3);

    memory.flush().await.unwrap();
    assert_eq!(cas.len(), 3);
    assert_eq!(cas.create_calls(), 1);
    assert!(memory.diff().await.unwrap().is_empty());

    // nothing left to push
    memory.flush().await.unwrap();
    assert_eq!(cas.create_calls(), 1);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let cas = Arc::new(MemoryCasRemote::new("memory"));
    let router = CasRouter::new(vec![cas as Arc<dyn CasRemote>]);
    let missing = hash_object(&json!({"never": "stored"}), &CidConfig::default()).unwrap();

    let err = router.get_entity(&missing).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::EntityNotFound);
}
