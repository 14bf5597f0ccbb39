//! Document store seam used by the index sync.
//!
//! The store only has to provide two things: an atomic batch commit and a
//! point read. [`memory::MemoryStore`] backs tests and local runs; the service
//! crate carries a Firestore REST implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StoreError;

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Path relative to the database's document root, e.g. `emailToUid/ab12`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Timestamp(DateTime<Utc>),
    /// Sentinel replaced by the commit time when the batch is applied.
    ServerTimestamp,
}

pub type Fields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub fields: Fields,
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Delete(DocRef),
    /// Full overwrite; fields not listed are dropped.
    Set { doc: DocRef, fields: Fields },
}

impl Write {
    pub fn doc(&self) -> &DocRef {
        match self {
            Write::Delete(doc) => doc,
            Write::Set { doc, .. } => doc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(&mut self, doc: DocRef) -> &mut Self {
        self.writes.push(Write::Delete(doc));
        self
    }

    pub fn set(&mut self, doc: DocRef, fields: Fields) -> &mut Self {
        self.writes.push(Write::Set { doc, fields });
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub commit_time: DateTime<Utc>,
    pub writes: usize,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Applies every write in `batch` or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError>;

    async fn get(&self, doc: &DocRef) -> Result<Option<Document>, StoreError>;

    /// Short backend name for health reporting.
    fn backend(&self) -> &'static str;
}
