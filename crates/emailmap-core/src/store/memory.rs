use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{CommitReceipt, DocRef, Document, DocumentStore, FieldValue, Write, WriteBatch};
use crate::error::StoreError;

/// Process-local store. One mutex guards every document, so a batch is
/// applied in full before any reader observes it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    docs: HashMap<DocRef, Document>,
    fail_next: usize,
    commits: usize,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` commits fail with `StoreError::Unavailable` and apply nothing.
    pub fn fail_next_commits(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits
    }

    /// Number of writes carried by successful commits so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .docs
            .keys()
            .filter(|d| d.collection == collection)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().docs.is_empty()
    }

    pub fn ids(&self, collection: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .docs
            .keys()
            .filter(|d| d.collection == collection)
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self, doc: &DocRef) -> Option<Document> {
        self.inner.lock().docs.get(doc).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        let mut state = self.inner.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        let commit_time = Utc::now();
        let count = batch.len();
        for write in batch.into_writes() {
            match write {
                Write::Delete(doc) => {
                    state.docs.remove(&doc);
                }
                Write::Set { doc, fields } => {
                    let fields = fields
                        .into_iter()
                        .map(|(name, value)| match value {
                            FieldValue::ServerTimestamp => {
                                (name, FieldValue::Timestamp(commit_time))
                            }
                            other => (name, other),
                        })
                        .collect();
                    state.docs.insert(
                        doc,
                        Document {
                            fields,
                            update_time: Some(commit_time),
                        },
                    );
                }
            }
        }
        state.commits += 1;
        state.writes += count;
        debug!(writes = count, "memory store commit applied");
        Ok(CommitReceipt {
            commit_time,
            writes: count,
        })
    }

    async fn get(&self, doc: &DocRef) -> Result<Option<Document>, StoreError> {
        Ok(self.inner.lock().docs.get(doc).cloned())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
