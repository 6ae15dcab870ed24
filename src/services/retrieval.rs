//! The Retrieval component (SPEC_FULL.md §4.G): dense, hybrid and
//! document-level search over chunk/document embeddings. Adapted from the
//! teacher's `database/repository.rs` (`search_user_documents` /
//! `hybrid_search_user_documents`) — the shape of the calls is kept, but the
//! stored procedures are inlined as plain SQL against pgvector's `<=>`
//! operator and Postgres full-text search, so the query plan is visible and
//! `min_similarity` can be applied as a post-query filter (SPEC_FULL.md §9)
//! without perturbing the vector-index scan order.

use pgvector::Vector;
use sqlx::Row;
use tracing::debug;

use crate::database::DbPool;
use crate::models::{ChunkSearchResult, DocumentSearchResult};
use crate::utils::error::{CoreError, CoreResult};

pub struct Retrieval {
    pool: DbPool,
}

impl Retrieval {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Pure vector (cosine distance) search over non-deleted chunks of
    /// completed documents, optionally restricted to one document. Results
    /// are ordered by ascending distance (most similar first) with
    /// ascending `chunk_index` as a tie-break, then filtered to
    /// `similarity >= min_similarity` in Rust.
    pub async fn dense_search(
        &self,
        query_embedding: &[f32],
        top_k: i64,
        min_similarity: f32,
        document_id: Option<uuid::Uuid>,
    ) -> CoreResult<Vec<ChunkSearchResult>> {
        let vector = Vector::from(query_embedding.to_vec());

        let rows = sqlx::query(
            r#"
            SELECT
                c.id AS chunk_id,
                c.document_id,
                d.original_filename,
                c.content,
                c.page_number,
                c.chunk_index,
                c.metadata,
                1 - (c.embedding <=> $1) AS similarity
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.deleted_at IS NULL
              AND d.status = 'completed'
              AND ($3::uuid IS NULL OR c.document_id = $3)
            ORDER BY c.embedding <=> $1 ASC, c.chunk_index ASC
            LIMIT $2
            "#,
        )
        .bind(&vector)
        .bind(top_k)
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::VectorSearch(e.to_string()))?;

        let results = Self::rows_to_results(rows)?
            .into_iter()
            .filter(|r| r.similarity >= min_similarity)
            .collect::<Vec<_>>();

        debug!(count = results.len(), "dense search complete");
        Ok(results)
    }

    /// Weighted blend of vector similarity and text rank:
    /// `vector_weight * (1 - distance) + text_weight * ts_rank(...)`.
    /// `min_similarity` still gates on the vector component alone, not the
    /// blend — a text-only match cannot pull a chunk in that the vector
    /// search would have rejected.
    pub async fn hybrid_search(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        top_k: i64,
        min_similarity: f32,
        vector_weight: f32,
        text_weight: f32,
        document_id: Option<uuid::Uuid>,
    ) -> CoreResult<Vec<ChunkSearchResult>> {
        let vector = Vector::from(query_embedding.to_vec());

        let rows = sqlx::query(
            r#"
            SELECT
                c.id AS chunk_id,
                c.document_id,
                d.original_filename,
                c.content,
                c.page_number,
                c.chunk_index,
                c.metadata,
                1 - (c.embedding <=> $1) AS vector_similarity,
                ($4 * (1 - (c.embedding <=> $1))
                    + $5 * COALESCE(ts_rank(to_tsvector('english', c.content), plainto_tsquery('english', $2)), 0.0)
                ) AS similarity
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.deleted_at IS NULL
              AND d.status = 'completed'
              AND ($6::uuid IS NULL OR c.document_id = $6)
            ORDER BY similarity DESC, c.chunk_index ASC
            LIMIT $3
            "#,
        )
        .bind(&vector)
        .bind(query_text)
        .bind(top_k)
        .bind(vector_weight)
        .bind(text_weight)
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::VectorSearch(e.to_string()))?;

        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            let vector_similarity: f32 =
                row.try_get("vector_similarity").map_err(|e| CoreError::VectorSearch(e.to_string()))?;
            if vector_similarity < min_similarity {
                continue;
            }
            filtered.push(row);
        }

        let results = Self::rows_to_results(filtered)?;
        debug!(count = results.len(), "hybrid search complete");
        Ok(results)
    }

    /// Document-level search over each document's `summary_embedding`.
    pub async fn document_search(
        &self,
        query_embedding: &[f32],
        top_k: i64,
        min_similarity: f32,
    ) -> CoreResult<Vec<DocumentSearchResult>> {
        let vector = Vector::from(query_embedding.to_vec());

        let rows = sqlx::query(
            r#"
            SELECT
                id AS document_id,
                original_filename,
                summary,
                1 - (summary_embedding <=> $1) AS similarity
            FROM documents
            WHERE deleted_at IS NULL
              AND status = 'completed'
              AND summary_embedding IS NOT NULL
            ORDER BY summary_embedding <=> $1 ASC
            LIMIT $2
            "#,
        )
        .bind(&vector)
        .bind(top_k)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::VectorSearch(e.to_string()))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let similarity: f32 = row.try_get("similarity").map_err(|e| CoreError::VectorSearch(e.to_string()))?;
            if similarity < min_similarity {
                continue;
            }
            results.push(DocumentSearchResult {
                document_id: row.try_get("document_id").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                original_filename: row
                    .try_get("original_filename")
                    .map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                summary: row.try_get("summary").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                similarity,
            });
        }

        Ok(results)
    }

    /// Full text of a document, chunks concatenated in `chunk_index` order,
    /// optionally restricted to a set of page numbers. Inserts a
    /// `--- Page N ---` marker each time the page number changes. Grounds
    /// the `file_reader` agent tool.
    pub async fn document_text(
        &self,
        document_id: uuid::Uuid,
        page_numbers: Option<&[i32]>,
    ) -> CoreResult<Option<String>> {
        let rows = sqlx::query(
            r#"
            SELECT content, page_number
            FROM chunks
            WHERE document_id = $1
              AND ($2::int[] IS NULL OR page_number = ANY($2))
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .bind(page_numbers)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::VectorSearch(e.to_string()))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut parts: Vec<String> = Vec::with_capacity(rows.len());
        let mut current_page: Option<i32> = None;
        for row in rows {
            let content: String = row.try_get("content").map_err(|e| CoreError::VectorSearch(e.to_string()))?;
            let page_number: Option<i32> =
                row.try_get("page_number").map_err(|e| CoreError::VectorSearch(e.to_string()))?;

            if let Some(page) = page_number {
                if current_page != Some(page) {
                    parts.push(format!("--- Page {page} ---"));
                    current_page = Some(page);
                }
            }
            parts.push(content);
        }
        Ok(Some(parts.join("\n")))
    }

    fn rows_to_results(rows: Vec<sqlx::postgres::PgRow>) -> CoreResult<Vec<ChunkSearchResult>> {
        rows.into_iter()
            .map(|row| {
                Ok(ChunkSearchResult {
                    chunk_id: row.try_get("chunk_id").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    document_id: row.try_get("document_id").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    original_filename: row
                        .try_get("original_filename")
                        .map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    content: row.try_get("content").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    page_number: row.try_get("page_number").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    chunk_index: row.try_get("chunk_index").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    metadata: row.try_get("metadata").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                    similarity: row.try_get("similarity").map_err(|e| CoreError::VectorSearch(e.to_string()))?,
                })
            })
            .collect()
    }
}
