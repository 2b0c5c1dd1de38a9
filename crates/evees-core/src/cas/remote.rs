use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::hash::{CidConfig, hash_object};
use super::store::CasRemote;
use crate::error::Result;

/// In-memory [`CasRemote`].
#[derive(Debug)]
pub struct MemoryCasRemote {
    cas_id: String,
    config: CidConfig,
    local: bool,
    objects: Mutex<HashMap<String, Value>>,
    create_calls: AtomicUsize,
}

impl MemoryCasRemote {
    #[must_use]
    pub fn new(cas_id: impl Into<String>) -> Self {
        Self::with_config(cas_id, CidConfig::default())
    }

    #[must_use]
    pub fn with_config(cas_id: impl Into<String>, config: CidConfig) -> Self {
        Self {
            cas_id: cas_id.into(),
            config,
            local: true,
            objects: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Mark the store as non-local, so forks clone entities away from it.
    #[must_use]
    pub const fn remote_only(mut self) -> Self {
        self.local = false;
        self
    }

    /// Number of `create` round trips served so far.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Overwrite the object stored under `id` without rehashing.
    ///
    /// Simulates a corrupted or malicious remote.
    pub fn tamper(&self, id: &str, object: Value) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_owned(), object);
    }
}

#[async_trait]
impl CasRemote for MemoryCasRemote {
    fn cas_id(&self) -> &str {
        &self.cas_id
    }

    fn cid_config(&self) -> CidConfig {
        self.config
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn create(&self, objects: Vec<Value>) -> Result<Vec<String>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut ids = Vec::with_capacity(objects.len());
        let mut stored = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        for object in objects {
            let id = hash_object(&object, &self.config)?;
            stored.entry(id.clone()).or_insert(object);
            ids.push(id);
        }
        Ok(ids)
    }
}
