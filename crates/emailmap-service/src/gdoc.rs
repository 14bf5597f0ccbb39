//! Plain-text import of a shared Google Doc, used to seed flashcard decks.

use anyhow::anyhow;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::GdocSettings;

#[derive(Debug, Error)]
pub enum GdocError {
    #[error("Invalid Google Doc URL")]
    InvalidUrl,

    #[error("Failed to load Google Doc: {0}")]
    Fetch(String),
}

lazy_static::lazy_static! {
    static ref DOC_ID: Regex = Regex::new(r"/document/d/([a-zA-Z0-9_-]+)").unwrap();
}

pub fn extract_doc_id(url: &str) -> Option<&str> {
    DOC_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[derive(Clone)]
pub struct GoogleDocFetcher {
    client: reqwest::Client,
    export_base: String,
}

impl GoogleDocFetcher {
    pub fn new(settings: &GdocSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("emailmap-service/0.1")
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| anyhow!("http client: {e}"))?;
        Ok(Self {
            client,
            export_base: settings.export_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn export_url(&self, doc_id: &str) -> String {
        format!("{}/document/d/{}/export?format=txt", self.export_base, doc_id)
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, GdocError> {
        let doc_id = extract_doc_id(url).ok_or(GdocError::InvalidUrl)?;
        let res = self
            .client
            .get(self.export_url(doc_id))
            .send()
            .await
            .map_err(|e| {
                warn!(doc_id, error = %e, "google doc fetch failed");
                GdocError::Fetch(e.to_string())
            })?;
        if !res.status().is_success() {
            warn!(doc_id, status = %res.status(), "google doc export refused");
            return Err(GdocError::Fetch(format!("status {}", res.status())));
        }
        let text = res
            .text()
            .await
            .map_err(|e| GdocError::Fetch(e.to_string()))?;
        info!(doc_id, bytes = text.len(), "google doc imported");
        Ok(text)
    }
}
