//! End-to-end behaviour of the index sync against the in-memory store.

use emailmap_core::{
    ChangeEvent, DocRef, DocumentStore, EmailDigest, EmailIndexSync, EmailNormalization,
    FieldValue, IndexSettings, MemoryStore, SyncError, SyncOutcome, Timestamp, TriggerParams,
    UserRecord,
};
use std::sync::Arc;

const INDEX: &str = "emailToUid";

fn digest(email: &str) -> String {
    EmailDigest::of(email, EmailNormalization::None).to_string()
}

fn event(before: Option<&str>, after: Option<&str>, user_id: &str) -> ChangeEvent {
    ChangeEvent {
        before: before.map(UserRecord::with_email),
        after: after.map(UserRecord::with_email),
        params: TriggerParams {
            user_id: user_id.to_string(),
        },
    }
}

fn setup() -> (Arc<MemoryStore>, EmailIndexSync) {
    let store = Arc::new(MemoryStore::new());
    let sync = EmailIndexSync::new(store.clone(), IndexSettings::default());
    (store, sync)
}

#[tokio::test]
async fn email_change_swaps_index_entry() {
    let (store, sync) = setup();
    sync.handle(&event(None, Some("a@x.com"), "u1")).await.unwrap();

    let outcome = sync
        .handle(&event(Some("a@x.com"), Some("b@x.com"), "u1"))
        .await
        .unwrap();
    match outcome {
        SyncOutcome::Applied {
            removed, inserted, ..
        } => {
            assert_eq!(removed.unwrap().as_str(), digest("a@x.com"));
            assert_eq!(inserted.unwrap().as_str(), digest("b@x.com"));
        }
        SyncOutcome::Unchanged => panic!("expected applied outcome"),
    }

    assert_eq!(store.ids(INDEX), vec![digest("b@x.com")]);
    let doc = store
        .get(&DocRef::new(INDEX, digest("b@x.com")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.fields.get("uid"), Some(&FieldValue::String("u1".into())));
    assert!(matches!(
        doc.fields.get("createdAt"),
        Some(FieldValue::Timestamp(_))
    ));
    assert_eq!(store.commit_count(), 2);
}

#[tokio::test]
async fn unchanged_email_issues_no_writes() {
    let (store, sync) = setup();
    let outcome = sync
        .handle(&event(Some("a@x.com"), Some("a@x.com"), "u1"))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.write_count(), 0);

    let outcome = sync.handle(&event(None, None, "u1")).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn creation_inserts_without_delete() {
    let (store, sync) = setup();
    sync.handle(&event(None, Some("c@y.com"), "u3")).await.unwrap();
    assert_eq!(store.write_count(), 1);
    assert_eq!(
        store.ids(INDEX),
        vec!["4a215f301a9861c2e0a67a7b42e1b90b3efa29b5bc04fe47f080c8a4fc33a4c4".to_string()]
    );
}

#[tokio::test]
async fn user_deletion_removes_entry() {
    let (store, sync) = setup();
    sync.handle(&event(None, Some("a@x.com"), "u1")).await.unwrap();
    sync.handle(&event(Some("a@x.com"), None, "u1")).await.unwrap();
    assert!(store.ids(INDEX).is_empty());
}

#[tokio::test]
async fn redelivery_converges_to_same_state() {
    let (store, sync) = setup();
    sync.handle(&event(None, Some("a@x.com"), "u1")).await.unwrap();
    let change = event(Some("a@x.com"), Some("b@x.com"), "u1");
    sync.handle(&change).await.unwrap();
    let once = store.ids(INDEX);
    sync.handle(&change).await.unwrap();
    assert_eq!(store.ids(INDEX), once);

    let entry = sync.index().lookup_email("b@x.com").await.unwrap().unwrap();
    assert_eq!(entry.uid, "u1");
}

#[tokio::test]
async fn failed_commit_is_surfaced_and_retry_succeeds() {
    let (store, sync) = setup();
    sync.handle(&event(None, Some("a@x.com"), "u1")).await.unwrap();
    store.fail_next_commits(1);

    let change = event(Some("a@x.com"), Some("b@x.com"), "u1");
    let err = sync.handle(&change).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    // neither half of the swap is visible
    assert_eq!(store.ids(INDEX), vec![digest("a@x.com")]);

    sync.handle(&change).await.unwrap();
    assert_eq!(store.ids(INDEX), vec![digest("b@x.com")]);
}

#[tokio::test]
async fn lookup_reads_index_entries() {
    let (_store, sync) = setup();
    let index = sync.index();
    assert!(index.lookup_email("a@x.com").await.unwrap().is_none());

    sync.handle(&event(None, Some("a@x.com"), "u1")).await.unwrap();
    let entry = index.lookup_email("a@x.com").await.unwrap().unwrap();
    assert_eq!(entry.uid, "u1");
    assert!(matches!(entry.created_at, Timestamp::At(_)));

    let by_digest = EmailDigest::parse(&digest("a@x.com")).unwrap();
    assert_eq!(index.lookup_digest(&by_digest).await.unwrap(), Some(entry));
}

#[tokio::test]
async fn normalized_index_ignores_case_only_changes() {
    let store = Arc::new(MemoryStore::new());
    let sync = EmailIndexSync::new(
        store.clone(),
        IndexSettings {
            normalization: EmailNormalization::TrimLowercase,
            ..IndexSettings::default()
        },
    );
    sync.handle(&event(None, Some("Ann@X.com"), "u1")).await.unwrap();
    let outcome = sync
        .handle(&event(Some("Ann@X.com"), Some("ann@x.com"), "u1"))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);
    assert_eq!(store.ids(INDEX), vec![digest("ann@x.com")]);
    assert!(sync.index().lookup_email(" ANN@x.com").await.unwrap().is_some());
}

#[tokio::test]
async fn empty_user_id_is_rejected_before_writing() {
    let (store, sync) = setup();
    let err = sync
        .handle(&event(None, Some("a@x.com"), ""))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedEvent(_)));
    assert_eq!(store.commit_count(), 0);
}
