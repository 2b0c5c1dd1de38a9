//! Merge scenarios: simple head merges, recursive context merges, forced
//! ownership and merge proposals.

mod common;

use common::{USER, local_stack, paragraph, stack_with_remotes, text_of, title};
use evees_core::config::EveesConfig;
use evees_core::error::{ErrorCode, EveesError};
use evees_core::evees::{Evees, ForkOptions};
use evees_core::merge::simple::MERGE_COMMIT_MESSAGE;
use evees_core::merge::recursive::ContextPair;
use evees_core::merge::{MergeConfig, MergeSession, RecursiveContextMergeStrategy, SimpleMergeStrategy};
use evees_core::proposals::{Proposal, create_merge_proposal};
use evees_core::types::{
    CreateEvee, EveesMutation, GetPerspectiveOptions, Update, UpdatePerspectiveData,
};
use serde_json::{Value, json};

async fn create(evees: &Evees, object: Value) -> String {
    evees
        .create_evee(CreateEvee {
            object: Some(object),
            ..CreateEvee::default()
        })
        .await
        .unwrap()
}

async fn head_of(evees: &Evees, perspective_id: &str) -> Option<String> {
    evees
        .get_perspective(perspective_id, GetPerspectiveOptions::default())
        .await
        .unwrap()
        .details
        .head_id
}

async fn text(evees: &Evees, perspective_id: &str) -> String {
    let data = evees.get_perspective_data(perspective_id).await.unwrap();
    text_of(&data.object).to_owned()
}

async fn edit(evees: &Evees, perspective_id: &str, object: Value) {
    evees
        .update_perspective_data(UpdatePerspectiveData::new(perspective_id, object))
        .await
        .unwrap();
}

/// A root titled "Doc" with one child page, and a full fork of it.
struct Forked {
    to_root: String,
    page: String,
    from_root: String,
    forked_page: String,
}

async fn forked_document(evees: &Evees, fork_remote: &str) -> Forked {
    let to_root = create(evees, title("Doc", &[])).await;
    let page = evees
        .add_new_child(&to_root, paragraph("Page 1"), 0, None)
        .await
        .unwrap();
    evees.flush().await.unwrap();

    let from_root = evees
        .fork(&to_root, fork_remote, None, ForkOptions::default())
        .await
        .unwrap();
    let forked_page = evees.get_child_id(&from_root, 0).await.unwrap();

    Forked {
        to_root,
        page,
        from_root,
        forked_page,
    }
}

// ---------------------------------------------------------------------------
// Simple strategy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fork_edit_merge_fast_forwards_the_text() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let original = create(evees, paragraph("draft")).await;
    let fork = evees
        .fork_perspective(&original, None, None, ForkOptions::default())
        .await
        .unwrap();
    assert_ne!(fork, original);
    assert_eq!(
        evees.get_perspective_context(&fork).await.unwrap(),
        evees.get_perspective_context(&original).await.unwrap()
    );

    edit(evees, &fork, paragraph("draft, reviewed")).await;
    let strategy = SimpleMergeStrategy::new(evees.clone());
    let merged = strategy
        .merge_perspectives_external(&original, &fork, &MergeConfig::default())
        .await
        .unwrap();
    assert_eq!(merged, original);
    assert_eq!(text(evees, &original).await, "draft, reviewed");

    let head = head_of(evees, &original).await.unwrap();
    let commit = evees.get_commit(&head).await.unwrap();
    assert_eq!(commit.payload().message.as_deref(), Some(MERGE_COMMIT_MESSAGE));
    assert_eq!(commit.payload().parents_ids.len(), 2);

    // merging the same source again changes nothing
    strategy
        .merge_perspectives_external(&original, &fork, &MergeConfig::default())
        .await
        .unwrap();
    assert_eq!(head_of(evees, &original).await.as_deref(), Some(head.as_str()));
}

#[tokio::test]
async fn concurrent_edits_combine_character_changes() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let original = create(evees, paragraph("hello world")).await;
    let fork = evees
        .fork_perspective(&original, None, None, ForkOptions::default())
        .await
        .unwrap();

    edit(evees, &original, paragraph("Hello world")).await;
    edit(evees, &fork, paragraph("hello world!")).await;

    SimpleMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&original, &fork, &MergeConfig::default())
        .await
        .unwrap();
    assert_eq!(text(evees, &original).await, "Hello world!");
}

#[tokio::test]
async fn merging_into_an_empty_perspective_adopts_the_source_head() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let empty = evees.create_evee(CreateEvee::default()).await.unwrap();
    let source = create(evees, paragraph("content")).await;

    SimpleMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&empty, &source, &MergeConfig::default())
        .await
        .unwrap();
    assert_eq!(head_of(evees, &empty).await, head_of(evees, &source).await);

    // a source without head is a no-op
    let blank = evees.create_evee(CreateEvee::default()).await.unwrap();
    let before = head_of(evees, &source).await;
    SimpleMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&source, &blank, &MergeConfig::default())
        .await
        .unwrap();
    assert_eq!(head_of(evees, &source).await, before);
}

#[tokio::test]
async fn objects_of_different_types_do_not_merge() {
    let stack = local_stack(EveesConfig::default());
    let strategy = SimpleMergeStrategy::new(stack.evees.clone());

    let err = strategy
        .merge_data(
            &paragraph("base"),
            &[paragraph("base"), json!({"unrelated": true})],
            &MergeConfig::default(),
            &strategy,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MergeConflict);

    // objects without a merge capability merge field by field
    let merged = strategy
        .merge_data(
            &json!({"a": 1, "b": "x"}),
            &[json!({"a": 2, "b": "x"}), json!({"a": 1, "b": "xy"})],
            &MergeConfig::default(),
            &strategy,
        )
        .await
        .unwrap();
    assert_eq!(merged, json!({"a": 2, "b": "xy"}));
}

// ---------------------------------------------------------------------------
// Recursive context strategy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn child_edits_merge_through_shared_contexts() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let doc = forked_document(evees, "local").await;
    assert_ne!(doc.forked_page, doc.page);

    edit(evees, &doc.forked_page, paragraph("Page 1 edited")).await;
    let root_head = head_of(evees, &doc.to_root).await;

    let merged = RecursiveContextMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&doc.to_root, &doc.from_root, &MergeConfig::default())
        .await
        .unwrap();

    assert_eq!(merged, doc.to_root);
    assert_eq!(text(evees, &doc.page).await, "Page 1 edited");
    assert_eq!(
        evees.get_perspective_children(&doc.to_root).await.unwrap(),
        vec![doc.page.clone()]
    );
    // the root data did not change, so its head did not move
    assert_eq!(head_of(evees, &doc.to_root).await, root_head);
    // the source is untouched
    assert_eq!(
        evees.get_perspective_children(&doc.from_root).await.unwrap(),
        vec![doc.forked_page.clone()]
    );
}

#[tokio::test]
async fn new_children_are_linked_as_is_without_forced_owner() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let doc = forked_document(evees, "local").await;
    let added = evees
        .add_new_child(&doc.from_root, paragraph("Page 2"), 1, None)
        .await
        .unwrap();

    RecursiveContextMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&doc.to_root, &doc.from_root, &MergeConfig::default())
        .await
        .unwrap();

    assert_eq!(
        evees.get_perspective_children(&doc.to_root).await.unwrap(),
        vec![doc.page.clone(), added]
    );
}

#[tokio::test]
async fn forced_owner_forks_new_children_under_the_target() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let doc = forked_document(evees, "local").await;
    let added = evees
        .add_new_child(&doc.from_root, paragraph("Page 2"), 1, None)
        .await
        .unwrap();

    let config = MergeConfig {
        force_owner: true,
        ..MergeConfig::default()
    };
    RecursiveContextMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&doc.to_root, &doc.from_root, &config)
        .await
        .unwrap();

    let children = evees.get_perspective_children(&doc.to_root).await.unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0], doc.page);
    let owned = &children[1];
    assert_ne!(owned, &added);
    assert_eq!(text(evees, owned).await, "Page 2");

    let details = evees
        .get_perspective(owned, GetPerspectiveOptions::default())
        .await
        .unwrap()
        .details;
    assert_eq!(details.guardian_id.as_deref(), Some(doc.to_root.as_str()));
    let forking = evees
        .get_perspective_entity(owned)
        .await
        .unwrap()
        .payload()
        .meta
        .clone()
        .and_then(|meta| meta.forking)
        .expect("fork records its source");
    assert_eq!(forking.perspective_id, added);
}

#[tokio::test]
async fn forced_owner_respects_detach() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let doc = forked_document(evees, "local").await;
    evees
        .add_new_child(&doc.from_root, paragraph("Page 2"), 1, None)
        .await
        .unwrap();

    let config = MergeConfig {
        force_owner: true,
        detach: Some(true),
        ..MergeConfig::default()
    };
    RecursiveContextMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&doc.to_root, &doc.from_root, &config)
        .await
        .unwrap();

    let owned = evees.get_child_id(&doc.to_root, 1).await.unwrap();
    let meta = evees.get_perspective_entity(&owned).await.unwrap().payload().meta.clone();
    assert!(meta.and_then(|meta| meta.forking).is_none());
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

fn assert_cycle_at(err: &EveesError, perspective_id: &str) {
    assert_eq!(err.code(), ErrorCode::CycleDetected);
    match err {
        EveesError::CycleDetected(id) => assert_eq!(id, perspective_id),
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

#[tokio::test]
async fn forking_a_self_linked_perspective_reports_the_cycle() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let root = create(evees, title("R", &[])).await;
    edit(evees, &root, title("R", &[root.as_str()])).await;
    evees.flush().await.unwrap();

    let err = evees
        .fork(&root, "local", None, ForkOptions::default())
        .await
        .unwrap_err();
    assert_cycle_at(&err, &root);

    // without recursion nothing below the head is visited
    let shallow = ForkOptions {
        recurse: false,
        detach: false,
    };
    evees.fork(&root, "local", None, shallow).await.unwrap();
}

#[tokio::test]
async fn self_linked_child_stops_the_context_walk() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let doc = forked_document(evees, "local").await;
    edit(
        evees,
        &doc.forked_page,
        json!({"text": "Page 1", "type": "Paragraph", "links": [doc.forked_page]}),
    )
    .await;
    let to_head = head_of(evees, &doc.to_root).await;

    let err = RecursiveContextMergeStrategy::new(evees.clone())
        .merge_perspectives_external(&doc.to_root, &doc.from_root, &MergeConfig::default())
        .await
        .unwrap_err();
    assert_cycle_at(&err, &doc.forked_page);
    assert_eq!(head_of(evees, &doc.to_root).await, to_head);
}

#[tokio::test]
async fn reentering_a_pair_under_merge_is_a_cycle() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let to_root = create(evees, title("Doc", &[])).await;
    let from_root = evees
        .fork_perspective(&to_root, None, None, ForkOptions::default())
        .await
        .unwrap();

    let strategy = RecursiveContextMergeStrategy::new(evees.clone());
    let session = MergeSession::new(strategy.simple());
    session.read_all_subcontexts(&to_root, &from_root).await.unwrap();
    let context = evees.get_perspective_context(&to_root).await.unwrap();
    assert_eq!(
        session.pair(&context),
        Some(ContextPair {
            to: Some(to_root.clone()),
            from: Some(from_root.clone()),
        })
    );

    // the source now links to itself, so merging its links leads back to
    // the pair being merged
    edit(evees, &from_root, title("Doc", &[from_root.as_str()])).await;
    let err = session
        .merge_perspectives(&to_root, &from_root, &MergeConfig::default())
        .await
        .unwrap_err();
    assert_cycle_at(&err, &to_root);

    // the guard is released once the merge returns
    edit(evees, &from_root, title("Doc v2", &[])).await;
    session
        .merge_perspectives(&to_root, &from_root, &MergeConfig::default())
        .await
        .unwrap();
    assert_eq!(text(evees, &to_root).await, "Doc v2");
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merge_proposal_leaves_the_base_untouched() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let doc = forked_document(evees, "local").await;
    edit(evees, &doc.forked_page, paragraph("Page 1 proposed")).await;

    let proposal = create_merge_proposal(evees, &doc.to_root, &doc.from_root, &MergeConfig::default())
        .await
        .unwrap();

    assert_eq!(proposal.to_perspective_id, doc.to_root);
    assert_eq!(proposal.from_perspective_id.as_deref(), Some(doc.from_root.as_str()));
    assert_eq!(proposal.creator_id.as_deref(), Some(USER));
    assert_eq!(proposal.to_head_id, head_of(evees, &doc.to_root).await);
    assert_eq!(proposal.from_head_id, head_of(evees, &doc.from_root).await);

    let update = proposal
        .mutation
        .updates
        .iter()
        .find(|update| update.perspective_id == doc.page)
        .expect("page is updated");
    assert_eq!(update.from_perspective_id.as_deref(), Some(doc.forked_page.as_str()));
    assert!(!proposal.mutation.entities.is_empty());

    assert_eq!(text(evees, &doc.page).await, "Page 1");

    // applying the proposal in a workspace shows the merged text
    let preview = evees
        .clone_workspace("preview", Some(proposal.mutation.clone()))
        .await
        .unwrap();
    assert_eq!(text(&preview, &doc.page).await, "Page 1 proposed");
}

#[tokio::test]
async fn proposals_must_have_a_single_authority() {
    let stack = stack_with_remotes(&["local", "other"], EveesConfig::default());
    let evees = &stack.evees;
    let here = create(evees, paragraph("here")).await;
    let there = evees
        .create_evee(CreateEvee {
            remote_id: Some("other".into()),
            object: Some(paragraph("there")),
            ..CreateEvee::default()
        })
        .await
        .unwrap();
    let there_head = head_of(evees, &there).await.unwrap();

    let mutation = EveesMutation {
        updates: vec![Update::head(&there, there_head)],
        ..EveesMutation::default()
    };
    let err = Proposal::from_mutation(evees, &here, None, mutation.clone())
        .await
        .unwrap_err();
    match err {
        EveesError::MultipleAuthorities(remotes) => assert_eq!(remotes, vec!["local", "other"]),
        other => panic!("expected MultipleAuthorities, got {other:?}"),
    }

    let proposal = Proposal::from_mutation(evees, &there, None, mutation).await.unwrap();
    assert_eq!(proposal.to_perspective_id, there);
    assert!(proposal.from_head_id.is_none());
}

#[tokio::test]
async fn proposal_serializes_with_camel_case_fields() {
    let stack = local_stack(EveesConfig::default());
    let evees = &stack.evees;
    let pid = create(evees, paragraph("x")).await;

    let proposal = Proposal::from_mutation(evees, &pid, None, EveesMutation::default())
        .await
        .unwrap();
    let value = serde_json::to_value(&proposal).unwrap();
    assert_eq!(value["toPerspectiveId"], json!(pid));
    assert!(value.get("fromPerspectiveId").is_none());

    let back: Proposal = serde_json::from_value(value).unwrap();
    assert_eq!(back, proposal);
}
