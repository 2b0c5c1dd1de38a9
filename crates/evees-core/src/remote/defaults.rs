//! Default perspective and commit construction shared by remotes.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde_json::json;

use super::RemoteEvees;
use crate::cas::{EntityCreate, Secured, Signed, sign_object};
use crate::error::Result;
use crate::types::{Commit, CreateCommit, PartialPerspective, Perspective};

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds, strictly increasing within the process.
///
/// Default contexts are derived from the creator and timestamp, so two
/// perspectives snapped in the same millisecond must not share one.
pub fn next_timestamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_TIMESTAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

/// Snap a perspective on `remote`, filling in anything `partial` leaves out.
///
/// The default context is the id of `{creatorId, timestamp}`.
pub async fn snap_default_perspective<R: RemoteEvees + ?Sized>(
    remote: &R,
    partial: PartialPerspective,
) -> Result<Secured<Perspective>> {
    let store = remote.store();
    let creator_id = partial
        .creator_id
        .or_else(|| remote.user_id())
        .unwrap_or_default();
    let timestamp = partial.timestamp.unwrap_or_else(next_timestamp);

    let context = match partial.context {
        Some(context) => context,
        None => {
            let draft = EntityCreate::new(json!({ "creatorId": creator_id, "timestamp": timestamp }))
                .on_remote(remote.id());
            store.hash_entity(&draft).await?.id
        }
    };

    let perspective = Perspective {
        remote: remote.id().to_owned(),
        path: partial.path.unwrap_or_else(|| remote.default_path().to_owned()),
        creator_id,
        context,
        timestamp,
        meta: partial.meta,
    };

    let draft = EntityCreate::from_object(&sign_object(perspective))?.on_remote(remote.id());
    store.hash_entity(&draft).await?.decode()
}

/// The deterministic home perspective of a user on `remote`.
pub async fn get_home<R: RemoteEvees + ?Sized>(
    remote: &R,
    user_id: Option<&str>,
) -> Result<Secured<Perspective>> {
    let creator_id = user_id
        .map(str::to_owned)
        .or_else(|| remote.user_id())
        .unwrap_or_default();
    snap_default_perspective(
        remote,
        PartialPerspective {
            context: Some(format!("{creator_id}.home")),
            creator_id: Some(creator_id),
            timestamp: Some(0),
            ..PartialPerspective::default()
        },
    )
    .await
}

/// Build an unsigned commit object.
#[must_use]
pub fn create_commit(commit: CreateCommit) -> Signed<Commit> {
    sign_object(Commit {
        creators_ids: commit.creators_ids,
        timestamp: commit.timestamp.unwrap_or_else(next_timestamp),
        message: commit.message,
        forking: commit.forking,
        parents_ids: commit.parents_ids,
        data_id: commit.data_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_strictly_increasing() {
        let stamps: Vec<i64> = (0..1000).map(|_| next_timestamp()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn commit_defaults() {
        let commit = create_commit(CreateCommit {
            data_id: "d".into(),
            parents_ids: vec!["p".into()],
            creators_ids: vec!["alice".into()],
            ..CreateCommit::default()
        });
        assert_eq!(commit.payload.data_id, "d");
        assert!(commit.payload.timestamp > 0);
        assert_eq!(commit.proof.proof_type, "ECDSA");
    }
}
