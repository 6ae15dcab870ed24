//! Postgres-backed `DocumentStore` (SPEC_FULL.md §4.F / §3): the concrete
//! persistence the Processor's capability trait is built against. Adapted
//! from the teacher's `repository.rs::insert_document_chunks` transaction
//! shape, generalized from its `(content, embedding)` tuple insert into a
//! full chunk-replace that also carries page number, content kind and
//! token count.

use chrono::Utc;
use uuid::Uuid;

use crate::database::DbPool;
use crate::models::Document;
use crate::services::processor::{DocumentStore, NewChunk};
use crate::utils::error::CoreResult;

pub struct DocumentRepository {
    pool: DbPool,
}

impl DocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DocumentStore for DocumentRepository {
    async fn find_by_content_hash(&self, content_hash: &str) -> CoreResult<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE content_hash = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(document)
    }

    async fn insert_pending(
        &self,
        stored_filename: &str,
        original_filename: &str,
        mime_type: &str,
        byte_size: i64,
        content_hash: &str,
    ) -> CoreResult<Document> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents
                (id, stored_filename, original_filename, mime_type, byte_size, content_hash,
                 status, chunk_count, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, '{}'::jsonb, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stored_filename)
        .bind(original_filename)
        .bind(mime_type)
        .bind(byte_size)
        .bind(content_hash)
        .bind(Utc::now())
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(document)
    }

    async fn mark_processing(&self, document_id: Uuid) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing', processing_started_at = $2
            WHERE id = $1
            "#,
        )
        .bind(document_id)
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, document_id: Uuid, reason: &str) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'failed', error_message = $2, processing_finished_at = $3
            WHERE id = $1
            "#,
        )
        .bind(document_id)
        .bind(reason)
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Replaces all chunks for a document inside a single transaction:
    /// delete-then-bulk-insert, so a retried/reprocessed document never
    /// accumulates stale rows alongside the fresh ones.
    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> CoreResult<()> {
        let mut tx = self.pool.get_pool().begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = $1").bind(document_id).execute(&mut *tx).await?;

        for (index, chunk) in chunks.iter().enumerate() {
            let vector = pgvector::Vector::from(chunk.embedding.clone());
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, chunk_index, page_number, content, content_kind,
                     token_count, embedding, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '{}'::jsonb)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(index as i32)
            .bind(chunk.page_number)
            .bind(&chunk.content)
            .bind(chunk.content_kind.as_str())
            .bind(chunk.token_count)
            .bind(&vector)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE documents SET chunk_count = $2 WHERE id = $1")
            .bind(document_id)
            .bind(chunks.len() as i32)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        document_id: Uuid,
        page_count: i32,
        summary: Option<String>,
        summary_embedding: Option<Vec<f32>>,
    ) -> CoreResult<()> {
        let vector = summary_embedding.map(pgvector::Vector::from);

        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'completed',
                page_count = $2,
                summary = $3,
                summary_embedding = $4,
                processing_finished_at = $5
            WHERE id = $1
            "#,
        )
        .bind(document_id)
        .bind(page_count)
        .bind(summary)
        .bind(vector)
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }
}

impl DocumentRepository {
    pub async fn soft_delete(&self, document_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET deleted_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(document_id)
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, document_id: Uuid) -> CoreResult<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            r#"SELECT * FROM documents WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(document)
    }

    /// Most recently created, non-deleted document with this original
    /// filename. Grounds the `file_reader` tool's `filename` lookup.
    pub async fn find_by_filename(&self, filename: &str) -> CoreResult<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE original_filename = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(filename)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(document)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> CoreResult<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(documents)
    }
}
