use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::{CoreError, CoreResult};

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub status: String,
    pub page_count: Option<i32>,
    pub chunk_count: i32,
    pub summary: Option<String>,
}

impl From<crate::models::Document> for DocumentResponse {
    fn from(doc: crate::models::Document) -> Self {
        Self {
            id: doc.id,
            original_filename: doc.original_filename,
            status: doc.status,
            page_count: doc.page_count,
            chunk_count: doc.chunk_count,
            summary: doc.summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
}

/// POST /api/documents — accepts a `file` multipart field, runs it through
/// the Processor synchronously and returns the resulting document id
/// (either freshly processed or a dedup hit).
pub async fn upload_document(State(state): State<AppState>, mut multipart: Multipart) -> CoreResult<Json<UploadResponse>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut mime_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::Validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            mime_type = field.content_type().map(|s| s.to_string());
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| CoreError::Validation(format!("failed to read file: {e}")))?
                    .to_vec(),
            );
        }
    }

    let bytes = file_bytes.ok_or_else(|| CoreError::Validation("missing 'file' field".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload.pdf".to_string());
    let mime_type = mime_type.unwrap_or_else(|| "application/pdf".to_string());

    info!(filename = %filename, byte_size = bytes.len(), "document upload received");

    let progress = |fraction: f32, stage: &str| {
        info!(fraction, stage, "processing progress");
    };

    let document_id = state.processor.process(&bytes, &filename, &mime_type, &progress).await?;

    Ok(Json(UploadResponse { document_id }))
}

pub async fn get_document(State(state): State<AppState>, Path(document_id): Path<Uuid>) -> CoreResult<Json<DocumentResponse>> {
    let document = state
        .documents
        .get(document_id)
        .await?
        .ok_or_else(|| CoreError::DocumentNotFound(document_id.to_string()))?;

    Ok(Json(document.into()))
}

#[derive(serde::Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_documents(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<ListParams>,
) -> CoreResult<Json<Vec<DocumentResponse>>> {
    let documents = state.documents.list(params.limit, params.offset).await?;
    Ok(Json(documents.into_iter().map(DocumentResponse::from).collect()))
}

pub async fn delete_document(State(state): State<AppState>, Path(document_id): Path<Uuid>) -> CoreResult<axum::http::StatusCode> {
    let removed = state.documents.soft_delete(document_id).await?;
    if !removed {
        return Err(CoreError::DocumentNotFound(document_id.to_string()));
    }
    warn!(document_id = %document_id, "document soft-deleted");
    Ok(axum::http::StatusCode::NO_CONTENT)
}
