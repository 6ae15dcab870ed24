use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// The crate-wide error type. Every variant in SPEC_FULL.md §7's table is
/// represented here with its recovery/surface semantics carried through
/// `status()` and a structured `details` map for correlation.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("document {0} not found")]
    DocumentNotFound(String),

    #[error("chat {0} not found")]
    ChatNotFound(String),

    #[error("message {0} not found")]
    MessageNotFound(String),

    #[error("tool '{0}' not found (known: {1:?})")]
    ToolNotFound(String, Vec<String>),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("file too large: {0} bytes (max {1} bytes)")]
    FileTooLarge(u64, u64),

    #[error("branch '{0}' does not exist")]
    InvalidBranch(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("document processing failed for {document_id}: {reason}")]
    DocumentProcessing { document_id: String, reason: String },

    #[error("model backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("embedding failed (batch {batch_index}): {message}")]
    Embedding { batch_index: usize, message: String },

    #[error("vector search failed: {0}")]
    VectorSearch(String),

    #[error("web search failed: {0}")]
    WebSearch(String),

    #[error("tool '{tool}' execution failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("maximum iterations ({0}) exceeded")]
    MaxIterationsExceeded(usize),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::DocumentNotFound(_)
            | Self::ChatNotFound(_)
            | Self::MessageNotFound(_)
            | Self::ToolNotFound(_, _) => StatusCode::NOT_FOUND,

            Self::UnsupportedFileType(_)
            | Self::FileTooLarge(_, _)
            | Self::InvalidBranch(_)
            | Self::Validation(_)
            | Self::DocumentProcessing { .. } => StatusCode::BAD_REQUEST,

            Self::BackendUnavailable(_) | Self::ModelNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,

            Self::Generation(_) | Self::Embedding { .. } | Self::VectorSearch(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::WebSearch(_) => StatusCode::SERVICE_UNAVAILABLE,

            Self::ToolExecution { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MaxIterationsExceeded(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DocumentNotFound(_) => "DocumentNotFound",
            Self::ChatNotFound(_) => "ChatNotFound",
            Self::MessageNotFound(_) => "MessageNotFound",
            Self::ToolNotFound(_, _) => "ToolNotFound",
            Self::UnsupportedFileType(_) => "UnsupportedFileType",
            Self::FileTooLarge(_, _) => "FileTooLarge",
            Self::InvalidBranch(_) => "InvalidBranch",
            Self::Validation(_) => "Validation",
            Self::DocumentProcessing { .. } => "DocumentProcessing",
            Self::BackendUnavailable(_) => "BackendUnavailable",
            Self::ModelNotFound(_) => "ModelNotFound",
            Self::Generation(_) => "Generation",
            Self::Embedding { .. } => "Embedding",
            Self::VectorSearch(_) => "VectorSearch",
            Self::WebSearch(_) => "WebSearch",
            Self::ToolExecution { .. } => "ToolExecution",
            Self::MaxIterationsExceeded(_) => "MaxIterationsExceeded",
            Self::Database(_) => "Database",
            Self::Internal(_) => "Internal",
        }
    }

    pub fn details(&self) -> Value {
        match self {
            Self::DocumentNotFound(id) | Self::ChatNotFound(id) | Self::MessageNotFound(id) => {
                json!({ "id": id })
            }
            Self::ToolNotFound(name, known) => json!({ "tool": name, "known_tools": known }),
            Self::FileTooLarge(size, max) => json!({ "byte_size": size, "max_bytes": max }),
            Self::InvalidBranch(name) => json!({ "branch": name }),
            Self::DocumentProcessing { document_id, .. } => json!({ "document_id": document_id }),
            Self::Embedding { batch_index, .. } => json!({ "batch_index": batch_index }),
            Self::ToolExecution { tool, .. } => json!({ "tool": tool }),
            Self::MaxIterationsExceeded(max) => json!({ "max_iterations": max }),
            _ => json!({}),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    details: Value,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(kind = self.kind(), "{self}");
            }
            _ => {
                tracing::warn!(kind = self.kind(), "{self}");
            }
        }

        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            details: self.details(),
        });

        (status, body).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
