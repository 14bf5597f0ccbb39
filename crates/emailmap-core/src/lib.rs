//! emailmap-core: derived lookup index from hashed email addresses to user ids.
//!
//! A user document change arrives as a [`ChangeEvent`]. [`plan_mutations`]
//! turns the before/after snapshots into at most one removal and one insert,
//! and [`EmailIndexSync`] commits them to a [`DocumentStore`] as one atomic
//! [`WriteBatch`]. Index keys are SHA-256 hex digests; plaintext emails are
//! never persisted or logged.

pub mod digest;
pub mod error;
pub mod journal;
pub mod model;
pub mod paths;
pub mod store;
pub mod sync;

pub use digest::{EmailDigest, EmailNormalization};
pub use error::{StoreError, SyncError};
pub use journal::{JournalEntry, SyncJournal};
pub use model::{ChangeEvent, EmailIndexEntry, Timestamp, TriggerParams, UserRecord};
pub use store::memory::MemoryStore;
pub use store::{
    CommitReceipt, DocRef, Document, DocumentStore, FieldValue, Fields, Write, WriteBatch,
};
pub use sync::{
    mutations_to_batch, plan_mutations, EmailIndex, EmailIndexSync, IndexMutation, IndexSettings,
    SyncOutcome, DEFAULT_INDEX_COLLECTION,
};
