use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a Document. Transitions are monotonic except that
/// `Failed` is terminal: Pending -> Processing -> (Completed | Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown document status '{other}'"),
        }
    }
}

/// One row per uploaded file. See SPEC_FULL.md §3 for the full invariant set:
/// the content hash is unique among non-deleted documents, and summary /
/// summary_embedding are present iff status is Completed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub stored_filename: String,
    pub original_filename: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub content_hash: String,
    pub status: String,
    pub error_message: Option<String>,
    pub page_count: Option<i32>,
    pub chunk_count: i32,
    pub summary: Option<String>,
    pub summary_embedding: Option<Vector>,
    #[sqlx(json)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_finished_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn status(&self) -> DocumentStatus {
        self.status.parse().unwrap_or(DocumentStatus::Failed)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Content kind of a Chunk after Extractor/Chunker processing: plain text,
/// image-description-only (no underlying page text), or a merge of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Vision,
    Merged,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Vision => "vision",
            Self::Merged => "merged",
        }
    }
}

/// A contiguous, indexed slice of a Document's merged content.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub page_number: Option<i32>,
    pub content: String,
    pub content_kind: String,
    pub token_count: i32,
    pub embedding: Option<Vector>,
    #[sqlx(json)]
    pub metadata: serde_json::Value,
}

/// A single dense/hybrid search hit, carrying everything a citation needs.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub original_filename: String,
    pub content: String,
    pub page_number: Option<i32>,
    pub similarity: f32,
    pub chunk_index: i32,
    pub metadata: serde_json::Value,
}

/// A document-level search hit over summary embeddings.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSearchResult {
    pub document_id: Uuid,
    pub original_filename: String,
    pub summary: Option<String>,
    pub similarity: f32,
}

/// Document-level metadata map produced by the Extractor (title, author, ...).
pub type DocumentMetadata = HashMap<String, String>;
