//! Observer hub for client events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Per-client `updated(perspective_ids)` hub.
///
/// Listeners run synchronously on the emitting task, outside the hub lock, so
/// a listener may emit on another hub.
#[derive(Default)]
pub struct ClientEvents {
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl ClientEvents {
    pub fn subscribe(&self, listener: impl Fn(&[String]) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn emit_updated(&self, perspective_ids: &[String]) {
        if perspective_ids.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        trace!(count = perspective_ids.len(), listeners = listeners.len(), "emit updated");
        for listener in listeners {
            listener(perspective_ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_receive_ids_until_unsubscribed() {
        let hub = ClientEvents::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = hub.subscribe(move |ids| sink.lock().unwrap().extend_from_slice(ids));

        hub.emit_updated(&["a".to_owned()]);
        hub.unsubscribe(id);
        hub.emit_updated(&["b".to_owned()]);

        assert_eq!(*seen.lock().unwrap(), vec!["a".to_owned()]);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn listener_may_emit_on_the_same_hub() {
        let hub = Arc::new(ClientEvents::default());
        let inner = Arc::downgrade(&hub);
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        hub.subscribe(move |ids| {
            counter.fetch_add(1, Ordering::SeqCst);
            if ids[0] == "first" {
                if let Some(hub) = inner.upgrade() {
                    hub.emit_updated(&["second".to_owned()]);
                }
            }
        });
        hub.emit_updated(&["first".to_owned()]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
