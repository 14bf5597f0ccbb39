use anyhow::{anyhow, bail, Context, Result};
use emailmap_core::paths::journal_path;
use emailmap_core::{EmailNormalization, IndexSettings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

const MIN_JOURNAL_BYTES: u64 = 4096;
const EMULATOR_TOKEN: &str = "owner";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Firestore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FirestoreSettings {
    pub project_id: Option<String>,
    pub database: String,
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for FirestoreSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            database: "(default)".into(),
            base_url: "https://firestore.googleapis.com".into(),
            token: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalSettings {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub max_bytes: u64,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl JournalSettings {
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => journal_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GdocSettings {
    pub export_base: String,
    pub timeout_secs: u64,
}

impl Default for GdocSettings {
    fn default() -> Self {
        Self {
            export_base: "https://docs.google.com".into(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub store: StoreBackend,
    pub index: IndexSettings,
    pub firestore: FirestoreSettings,
    pub journal: JournalSettings,
    pub gdoc: GdocSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreBackend::Memory,
            index: IndexSettings::default(),
            firestore: FirestoreSettings::default(),
            journal: JournalSettings::default(),
            gdoc: GdocSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// File (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        info!(
            bind = %config.bind,
            store = ?config.store,
            collection = %config.index.collection,
            normalization = ?config.index.normalization,
            journal = config.journal.enabled,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("EMAILMAP_BIND") {
            self.bind = bind
                .parse()
                .map_err(|e| anyhow!("EMAILMAP_BIND invalid: {e}"))?;
        }
        if let Some(store) = lookup("EMAILMAP_STORE") {
            self.store = match store.trim().to_ascii_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "firestore" => StoreBackend::Firestore,
                other => bail!("EMAILMAP_STORE must be 'memory' or 'firestore', got '{other}'"),
            };
        }
        if let Some(collection) = lookup("EMAILMAP_COLLECTION") {
            self.index.collection = collection;
        }
        if let Some(normalization) = lookup("EMAILMAP_NORMALIZATION") {
            self.index.normalization = normalization.parse::<EmailNormalization>()?;
        }
        if let Some(journal) = lookup("EMAILMAP_JOURNAL") {
            match journal.trim() {
                "off" | "false" | "0" => self.journal.enabled = false,
                "on" | "true" | "1" => self.journal.enabled = true,
                path => {
                    self.journal.enabled = true;
                    self.journal.path = Some(PathBuf::from(path));
                }
            }
        }
        if let Some(project) =
            lookup("FIRESTORE_PROJECT_ID").or_else(|| lookup("GOOGLE_CLOUD_PROJECT"))
        {
            self.firestore.project_id = Some(project);
        }
        if let Some(database) = lookup("FIRESTORE_DATABASE") {
            self.firestore.database = database;
        }
        if let Some(host) = lookup("FIRESTORE_EMULATOR_HOST") {
            self.firestore.base_url = format!("http://{}", host.trim_end_matches('/'));
            if self.firestore.token.is_none() {
                self.firestore.token = Some(EMULATOR_TOKEN.to_string());
            }
        }
        if let Some(token) = lookup("FIRESTORE_TOKEN") {
            self.firestore.token = Some(token);
        }
        if let Some(base) = lookup("GDOC_EXPORT_BASE") {
            self.gdoc.export_base = base;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let collection = &self.index.collection;
        if collection.trim().is_empty() || collection.contains('/') {
            bail!("index collection must be a single non-empty path segment");
        }
        if self.store == StoreBackend::Firestore {
            match &self.firestore.project_id {
                Some(p) if !p.trim().is_empty() => {}
                _ => bail!("firestore backend requires a project id"),
            }
            if self.firestore.database.trim().is_empty() {
                bail!("firestore database name must not be empty");
            }
        }
        for (name, url) in [
            ("firestore.base_url", &self.firestore.base_url),
            ("gdoc.export_base", &self.gdoc.export_base),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("{name} must be an http(s) URL");
            }
        }
        if self.firestore.timeout_secs == 0 || self.gdoc.timeout_secs == 0 {
            bail!("timeouts must be at least one second");
        }
        if self.journal.enabled && self.journal.max_bytes < MIN_JOURNAL_BYTES {
            bail!("journal max_bytes must be at least {MIN_JOURNAL_BYTES}");
        }
        Ok(())
    }
}
