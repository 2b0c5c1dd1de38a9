//! Debounced perspective updates.
//!
//! `update_perspective_data` with a debounce window parks the hashed data,
//! commit and update here, keyed by perspective. A newer update to the same
//! perspective replaces the parked one and restarts its timer, so a burst of
//! edits reaches the client as a single update. Reads through
//! [`Evees::get_perspective`] observe parked updates.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Evees;
use crate::cas::{Entity, EntityCreate};
use crate::config::FlushConfig;
use crate::error::Result;
use crate::types::Update;

/// An update waiting for its debounce window to elapse.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub flush: FlushConfig,
    pub update: Update,
    pub commit: Entity,
    pub data: Entity,
}

struct PendingEntry {
    seq: u64,
    pending: PendingUpdate,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct PendingState {
    entries: HashMap<String, PendingEntry>,
    next_seq: u64,
    /// Updates taken out of `entries` that have not finished executing.
    in_flight: usize,
}

impl PendingState {
    fn busy(&self) -> bool {
        !self.entries.is_empty() || self.in_flight > 0
    }
}

pub struct PendingUpdates {
    state: Mutex<PendingState>,
    idle: Notify,
    events: watch::Sender<bool>,
}

impl Default for PendingUpdates {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            idle: Notify::new(),
            events: watch::channel(false).0,
        }
    }
}

impl PendingUpdates {
    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PendingState) {
        self.events.send_replace(state.busy());
    }

    /// The parked update for `perspective_id`, if any.
    pub fn get(&self, perspective_id: &str) -> Option<PendingUpdate> {
        self.state()
            .entries
            .get(perspective_id)
            .map(|entry| entry.pending.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Park `pending`, replacing (and cancelling) any earlier one. Returns
    /// the sequence number the timer must present to take it.
    fn park(&self, perspective_id: &str, pending: PendingUpdate) -> u64 {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        let previous = state.entries.insert(
            perspective_id.to_owned(),
            PendingEntry {
                seq,
                pending,
                timer: None,
            },
        );
        if let Some(timer) = previous.and_then(|entry| entry.timer) {
            timer.abort();
        }
        self.publish(&state);
        seq
    }

    fn attach_timer(&self, perspective_id: &str, seq: u64, timer: JoinHandle<()>) {
        let mut state = self.state();
        match state.entries.get_mut(perspective_id) {
            Some(entry) if entry.seq == seq => entry.timer = Some(timer),
            // already taken or replaced
            _ => {}
        }
    }

    /// Take the entry if it is still the one parked under `seq`.
    fn take(&self, perspective_id: &str, seq: u64) -> Option<PendingUpdate> {
        let mut state = self.state();
        if state.entries.get(perspective_id).map(|entry| entry.seq) != Some(seq) {
            return None;
        }
        let entry = state.entries.remove(perspective_id)?;
        state.in_flight += 1;
        Some(entry.pending)
    }

    /// Take every parked entry and cancel its timer.
    fn drain(&self) -> Vec<PendingUpdate> {
        let mut state = self.state();
        let drained: Vec<PendingUpdate> = state
            .entries
            .drain()
            .map(|(_, entry)| {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                entry.pending
            })
            .collect();
        state.in_flight += drained.len();
        drained
    }

    fn finish(&self, count: usize) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(count);
        self.publish(&state);
        if state.in_flight == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.state().in_flight == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Evees {
    /// `true` while any update is parked or executing.
    pub fn subscribe_pending(&self) -> watch::Receiver<bool> {
        self.inner.pending.events.subscribe()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub(super) fn schedule_pending(&self, perspective_id: &str, pending: PendingUpdate) {
        let debounce = Duration::from_millis(pending.flush.debounce().unwrap_or_default());
        let seq = self.inner.pending.park(perspective_id, pending);
        debug!(perspective_id, seq, debounce_ms = debounce.as_millis(), "parked update");

        let evees = self.clone();
        let id = perspective_id.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(pending) = evees.inner.pending.take(&id, seq) else {
                return;
            };
            if let Err(err) = evees.execute_update(pending).await {
                warn!(perspective_id = %id, error = %err, "debounced update failed");
            }
            evees.inner.pending.finish(1);
        });
        self.inner.pending.attach_timer(perspective_id, seq, timer);
    }

    /// Store the data and commit of `pending`, then apply its update.
    pub(super) async fn execute_update(&self, pending: PendingUpdate) -> Result<()> {
        let PendingUpdate {
            flush,
            update,
            commit,
            data,
        } = pending;
        self.store()
            .store_entities(&[EntityCreate::from(&data), EntityCreate::from(&commit)])
            .await?;
        self.update_perspective(update, flush.autoflush).await
    }

    /// Execute every parked update now and wait for updates already running.
    pub async fn await_pending(&self) -> Result<()> {
        let drained = self.inner.pending.drain();
        let count = drained.len();
        if count > 0 {
            debug!(evees = %self.name(), count, "executing pending updates");
        }

        let results = join_all(drained.into_iter().map(|pending| self.execute_update(pending))).await;
        self.inner.pending.finish(count);
        self.inner.pending.wait_idle().await;

        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }
}
