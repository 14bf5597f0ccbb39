use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use emailmap_core::{StoreError, SyncError};
use thiserror::Error;
use tracing::error;

use crate::gdoc::GdocError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gdoc(#[from] GdocError),
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::MalformedEvent(reason) => AppError::MalformedPayload(reason),
            SyncError::Store(store) => AppError::Store(store),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            // non-2xx makes the event platform redeliver
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Gdoc(GdocError::InvalidUrl) => StatusCode::BAD_REQUEST,
            AppError::Gdoc(GdocError::Fetch(_)) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}
