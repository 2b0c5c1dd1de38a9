#![allow(dead_code)]

use std::sync::{Arc, Once};

use evees_core::cas::{CasOnMemory, CasRemote, CasRouter, CasStore, MemoryCasRemote};
use evees_core::client::{Client, ClientCachedWithBase, RemoteRouter};
use evees_core::config::EveesConfig;
use evees_core::evees::Evees;
use evees_core::patterns::{PatternRecognizer, TextNode};
use evees_core::remote::{RemoteEvees, RemoteLocal};
use serde_json::Value;

pub const CAS_ID: &str = "memory-cas";
pub const USER: &str = "alice";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One CAS, one or more local remotes, a remote router and an app-level
/// cache client with its own in-memory store.
pub struct Stack {
    pub evees: Evees,
    pub cas: Arc<MemoryCasRemote>,
    pub remotes: Vec<Arc<RemoteLocal>>,
    /// App-level memory store over `router`.
    pub store: Arc<dyn CasStore>,
    /// CAS router shared by every remote.
    pub router: Arc<dyn CasStore>,
    /// Remote router under the app client.
    pub base: Arc<dyn Client>,
}

impl Stack {
    pub fn remote(&self) -> &RemoteLocal {
        &self.remotes[0]
    }

    /// Round trips that reached the authoritative remotes.
    pub fn remote_updates(&self) -> usize {
        self.remotes.iter().map(|remote| remote.update_calls()).sum()
    }
}

pub fn local_stack(config: EveesConfig) -> Stack {
    stack_with_remotes(&["local"], config)
}

pub fn stack_with_remotes(remote_ids: &[&str], config: EveesConfig) -> Stack {
    init_tracing();

    let cas = Arc::new(MemoryCasRemote::new(CAS_ID));
    let stores: Vec<Arc<dyn CasRemote>> = vec![cas.clone()];
    let router: Arc<dyn CasStore> = Arc::new(CasRouter::new(stores.clone()));

    let remotes: Vec<Arc<RemoteLocal>> = remote_ids
        .iter()
        .map(|id| Arc::new(RemoteLocal::new(*id, CAS_ID, Some(USER.to_owned()), router.clone())))
        .collect();
    let dyn_remotes: Vec<Arc<dyn RemoteEvees>> = remotes
        .iter()
        .map(|remote| remote.clone() as Arc<dyn RemoteEvees>)
        .collect();

    let base: Arc<dyn Client> = Arc::new(RemoteRouter::new(router.clone(), dyn_remotes.clone()));
    let store: Arc<dyn CasStore> = Arc::new(CasOnMemory::with_base(router.clone()));
    let client: Arc<dyn Client> = Arc::new(ClientCachedWithBase::on_memory(
        "app",
        store.clone(),
        Some(base.clone()),
    ));

    let evees = Evees::new(
        "app",
        client,
        Arc::new(PatternRecognizer::with_defaults()),
        dyn_remotes,
        stores,
        config,
    );

    Stack {
        evees,
        cas,
        remotes,
        store,
        router,
        base,
    }
}

pub fn paragraph(text: &str) -> Value {
    serde_json::to_value(TextNode::paragraph(text)).expect("text node serializes")
}

pub fn title(text: &str, links: &[&str]) -> Value {
    let links = links.iter().map(|link| (*link).to_owned()).collect();
    serde_json::to_value(TextNode::title(text, links)).expect("text node serializes")
}

pub fn text_of(object: &Value) -> &str {
    object["text"].as_str().unwrap_or_default()
}
