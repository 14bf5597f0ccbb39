//! Firestore over its REST API. Only the two calls the index needs:
//! `documents:commit` and a point `GET`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use emailmap_core::{CommitReceipt, DocRef, Document, DocumentStore, StoreError, WriteBatch};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::FirestoreSettings;

pub mod codec;

#[derive(Clone)]
pub struct FirestoreStore {
    client: reqwest::Client,
    base_url: String,
    database_path: String,
    token: Option<String>,
}

impl FirestoreStore {
    pub fn new(settings: &FirestoreSettings) -> Result<Self> {
        let project = settings
            .project_id
            .as_deref()
            .ok_or_else(|| anyhow!("firestore project id missing"))?;
        let client = reqwest::Client::builder()
            .user_agent("emailmap-service/0.1")
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| anyhow!("http client: {e}"))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            database_path: format!("projects/{}/databases/{}", project, settings.database),
            token: settings.token.clone(),
        })
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database_path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

async fn status_error(res: reqwest::Response) -> StoreError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StoreError::Unavailable(format!("{status}: {message}"))
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        let url = format!(
            "{}/v1/{}/documents:commit",
            self.base_url, self.database_path
        );
        let body = codec::encode_commit(&self.documents_root(), &batch);
        let res = self
            .authorize(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(transport_error)?;
        if !res.status().is_success() {
            return Err(status_error(res).await);
        }
        let reply: Value = res.json().await.map_err(transport_error)?;
        let commit_time = reply["commitTime"]
            .as_str()
            .and_then(codec::parse_timestamp)
            .unwrap_or_else(Utc::now);
        debug!(writes = batch.len(), %commit_time, "firestore commit");
        Ok(CommitReceipt {
            commit_time,
            writes: batch.len(),
        })
    }

    async fn get(&self, doc: &DocRef) -> Result<Option<Document>, StoreError> {
        let name = codec::document_name(&self.documents_root(), &doc.path());
        let url = format!("{}/v1/{}", self.base_url, name);
        let res = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(status_error(res).await);
        }
        let value: Value = res.json().await.map_err(transport_error)?;
        codec::decode_document(&value).map(Some)
    }

    fn backend(&self) -> &'static str {
        "firestore"
    }
}
