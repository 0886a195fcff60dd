//! Evidence upload endpoint

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::evidence::StoredEvidence;
use crate::server::AppState;

const FILES_FIELD: &str = "files";
const MAX_FILES_PER_UPLOAD: usize = 10;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<StoredEvidence>,
}

/// Request body limit for an upload of several files
pub fn body_limit(max_file_bytes: usize) -> usize {
    max_file_bytes
        .saturating_mul(MAX_FILES_PER_UPLOAD)
        .saturating_add(64 * 1024)
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    // Validate the whole upload before anything touches disk
    let mut received = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        // Plain form values under the same name are not files
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        if bytes.len() > state.evidence.max_file_bytes() {
            return Err(ApiError::PayloadTooLarge(format!(
                "{} exceeds the {} byte limit",
                original_name,
                state.evidence.max_file_bytes()
            )));
        }
        if received.len() == MAX_FILES_PER_UPLOAD {
            return Err(ApiError::bad_request(format!(
                "At most {} files per upload",
                MAX_FILES_PER_UPLOAD
            )));
        }
        received.push((original_name, bytes));
    }

    if received.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let mut files = Vec::with_capacity(received.len());
    for (original_name, bytes) in &received {
        match state.evidence.save(original_name, bytes).await {
            Ok(stored) => files.push(stored),
            Err(e) => {
                state.evidence.discard(&files).await;
                return Err(e.into());
            }
        }
    }

    info!("Stored {} evidence file(s)", files.len());
    Ok((StatusCode::CREATED, Json(UploadResponse { files })))
}
