use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::digest::{EmailDigest, EmailNormalization};
use crate::error::{StoreError, SyncError};
use crate::model::{ChangeEvent, EmailIndexEntry};
use crate::store::{DocRef, DocumentStore, WriteBatch};

pub const DEFAULT_INDEX_COLLECTION: &str = "emailToUid";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexSettings {
    pub collection: String,
    pub normalization: EmailNormalization,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            collection: DEFAULT_INDEX_COLLECTION.to_string(),
            normalization: EmailNormalization::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMutation {
    Remove { digest: EmailDigest },
    Insert { digest: EmailDigest, uid: String },
}

/// Decides which index documents change for one user-document write.
///
/// Returns an empty list when the email is unchanged, including when it is
/// absent on both sides. Otherwise the old digest (if any) is removed and the
/// new digest (if any) is inserted. Entries are never updated in place.
pub fn plan_mutations(
    before_email: Option<&str>,
    after_email: Option<&str>,
    user_id: &str,
    normalization: EmailNormalization,
) -> Vec<IndexMutation> {
    if before_email == after_email {
        return Vec::new();
    }
    let old = before_email.map(|e| EmailDigest::of(e, normalization));
    let new = after_email.map(|e| EmailDigest::of(e, normalization));
    // Only reachable with normalization: two spellings, one key.
    if old.is_some() && old == new {
        return Vec::new();
    }

    let mut mutations = Vec::with_capacity(2);
    if let Some(digest) = old {
        mutations.push(IndexMutation::Remove { digest });
    }
    if let Some(digest) = new {
        mutations.push(IndexMutation::Insert {
            digest,
            uid: user_id.to_string(),
        });
    }
    mutations
}

pub fn mutations_to_batch(mutations: &[IndexMutation], collection: &str) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for mutation in mutations {
        match mutation {
            IndexMutation::Remove { digest } => {
                batch.delete(DocRef::new(collection, digest.as_str()));
            }
            IndexMutation::Insert { digest, uid } => {
                batch.set(
                    DocRef::new(collection, digest.as_str()),
                    EmailIndexEntry::pending(uid.clone()).to_fields(),
                );
            }
        }
    }
    batch
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    Applied {
        user_id: String,
        removed: Option<EmailDigest>,
        inserted: Option<EmailDigest>,
        commit_time: DateTime<Utc>,
    },
}

/// Keeps `emailToUid` in step with user documents.
#[derive(Clone)]
pub struct EmailIndexSync {
    store: Arc<dyn DocumentStore>,
    settings: IndexSettings,
}

impl EmailIndexSync {
    pub fn new(store: Arc<dyn DocumentStore>, settings: IndexSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn index(&self) -> EmailIndex {
        EmailIndex::new(self.store.clone(), self.settings.clone())
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Applies one trigger invocation. A no-op issues no writes; anything else
    /// is exactly one atomic commit. Failures are returned for the platform to
    /// redeliver; nothing is retried here.
    pub async fn handle(&self, event: &ChangeEvent) -> Result<SyncOutcome, SyncError> {
        event.validate()?;
        let user_id = event.user_id();
        let mutations = plan_mutations(
            event.before_email(),
            event.after_email(),
            user_id,
            self.settings.normalization,
        );
        if mutations.is_empty() {
            debug!(user_id, "email unchanged; index untouched");
            return Ok(SyncOutcome::Unchanged);
        }

        let mut removed = None;
        let mut inserted = None;
        for mutation in &mutations {
            match mutation {
                IndexMutation::Remove { digest } => removed = Some(digest.clone()),
                IndexMutation::Insert { digest, .. } => inserted = Some(digest.clone()),
            }
        }

        let batch = mutations_to_batch(&mutations, &self.settings.collection);
        let receipt = match self.store.commit(batch).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(user_id, error = %err, transient = err.is_transient(), "index commit failed");
                return Err(err.into());
            }
        };

        info!(
            user_id,
            old = removed.as_ref().map(|d| d.short()).unwrap_or("-"),
            new = inserted.as_ref().map(|d| d.short()).unwrap_or("-"),
            writes = receipt.writes,
            "email index updated"
        );
        Ok(SyncOutcome::Applied {
            user_id: user_id.to_string(),
            removed,
            inserted,
            commit_time: receipt.commit_time,
        })
    }
}

/// Read side of the index.
#[derive(Clone)]
pub struct EmailIndex {
    store: Arc<dyn DocumentStore>,
    settings: IndexSettings,
}

impl EmailIndex {
    pub fn new(store: Arc<dyn DocumentStore>, settings: IndexSettings) -> Self {
        Self { store, settings }
    }

    pub async fn lookup_email(&self, email: &str) -> Result<Option<EmailIndexEntry>, StoreError> {
        let digest = EmailDigest::of(email, self.settings.normalization);
        self.lookup_digest(&digest).await
    }

    pub async fn lookup_digest(
        &self,
        digest: &EmailDigest,
    ) -> Result<Option<EmailIndexEntry>, StoreError> {
        let doc = DocRef::new(&self.settings.collection, digest.as_str());
        match self.store.get(&doc).await? {
            Some(found) => EmailIndexEntry::from_document(&doc.path(), &found).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldValue, Write};

    const RAW: EmailNormalization = EmailNormalization::None;

    fn digest(email: &str) -> EmailDigest {
        EmailDigest::of(email, RAW)
    }

    #[test]
    fn email_change_removes_old_and_inserts_new() {
        let plan = plan_mutations(Some("a@x.com"), Some("b@x.com"), "u1", RAW);
        assert_eq!(
            plan,
            vec![
                IndexMutation::Remove {
                    digest: digest("a@x.com")
                },
                IndexMutation::Insert {
                    digest: digest("b@x.com"),
                    uid: "u1".into()
                },
            ]
        );
    }

    #[test]
    fn unchanged_email_plans_nothing() {
        assert!(plan_mutations(Some("a@x.com"), Some("a@x.com"), "u1", RAW).is_empty());
        assert!(plan_mutations(None, None, "u1", RAW).is_empty());
    }

    #[test]
    fn creation_only_inserts() {
        let plan = plan_mutations(None, Some("c@y.com"), "u3", RAW);
        assert_eq!(
            plan,
            vec![IndexMutation::Insert {
                digest: digest("c@y.com"),
                uid: "u3".into()
            }]
        );
    }

    #[test]
    fn deletion_only_removes() {
        let plan = plan_mutations(Some("a@x.com"), None, "u1", RAW);
        assert_eq!(
            plan,
            vec![IndexMutation::Remove {
                digest: digest("a@x.com")
            }]
        );
    }

    #[test]
    fn case_change_is_a_swap_without_normalization() {
        let plan = plan_mutations(Some("A@x.com"), Some("a@x.com"), "u1", RAW);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn case_change_is_a_no_op_with_normalization() {
        let plan = plan_mutations(
            Some("A@x.com"),
            Some("a@x.com "),
            "u1",
            EmailNormalization::TrimLowercase,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn batch_targets_index_collection() {
        let plan = plan_mutations(Some("a@x.com"), Some("b@x.com"), "u1", RAW);
        let batch = mutations_to_batch(&plan, DEFAULT_INDEX_COLLECTION);
        let writes = batch.writes();
        assert_eq!(
            writes[0],
            Write::Delete(DocRef::new("emailToUid", digest("a@x.com").as_str()))
        );
        match &writes[1] {
            Write::Set { doc, fields } => {
                assert_eq!(doc.id, digest("b@x.com").as_str());
                assert_eq!(fields.get("uid"), Some(&FieldValue::String("u1".into())));
                assert_eq!(fields.get("createdAt"), Some(&FieldValue::ServerTimestamp));
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected write {other:?}"),
        }
    }
}
