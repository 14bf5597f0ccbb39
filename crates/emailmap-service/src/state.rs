use anyhow::Result;
use emailmap_core::{DocumentStore, EmailIndexSync, MemoryStore, SyncJournal};
use std::sync::Arc;
use tracing::info;

use crate::config::{ServiceConfig, StoreBackend};
use crate::firestore::FirestoreStore;
use crate::gdoc::GoogleDocFetcher;

pub struct AppState {
    pub sync: EmailIndexSync,
    pub journal: Option<Arc<SyncJournal>>,
    pub gdoc: GoogleDocFetcher,
}

impl AppState {
    pub fn from_config(config: &ServiceConfig) -> Result<Arc<Self>> {
        let store: Arc<dyn DocumentStore> = match config.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Firestore => Arc::new(FirestoreStore::new(&config.firestore)?),
        };
        let journal = if config.journal.enabled {
            let path = config.journal.resolved_path()?;
            info!(path = %path.display(), "sync journal enabled");
            Some(SyncJournal::open(path, config.journal.max_bytes)?)
        } else {
            None
        };
        Self::with_store(config, store, journal)
    }

    /// Wiring with an explicit store, used by tests and the `apply` command.
    pub fn with_store(
        config: &ServiceConfig,
        store: Arc<dyn DocumentStore>,
        journal: Option<SyncJournal>,
    ) -> Result<Arc<Self>> {
        let sync = EmailIndexSync::new(store, config.index.clone());
        let gdoc = GoogleDocFetcher::new(&config.gdoc)?;
        Ok(Arc::new(Self {
            sync,
            journal: journal.map(Arc::new),
            gdoc,
        }))
    }
}
