//! The Embedder (SPEC_FULL.md §4.C): turns text into vectors against the
//! configured embedding backend. Adapted from the teacher's
//! `embedding_service.rs` — the semaphore-gated single-call path is kept
//! near verbatim; batching is reworked to be strictly order-preserving and
//! to retry each failing text with exponential backoff before giving up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ModelBackendConfig;
use crate::utils::error::CoreError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Capability seam the Processor and Retrieval components depend on, so
/// either can run against a stub backend in tests.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
}

#[derive(Clone)]
pub struct Embedder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    batch_size: usize,
    retry_attempts: u32,
    limiters: Arc<Limiters>,
}

impl Embedder {
    pub fn new(config: &ModelBackendConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.embedding_timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            batch_size: config.embedding_batch_size.max(1),
            retry_attempts: config.embedding_retry_attempts.max(1),
            limiters,
        }
    }

    async fn embed_with_retry(&self, text: &str, batch_index: usize) -> Result<Vec<f32>, CoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.embed_once(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(err) if attempt < self.retry_attempts => {
                    let backoff = Duration::from_millis(100 * 2u64.saturating_pow(attempt - 1));
                    warn!(
                        batch_index,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying embedding call"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    return Err(CoreError::Embedding { batch_index, message: err.to_string() });
                }
            }
        }
    }

    async fn embed_once(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.embedding.clone(),
            self.limiters.acquire_timeout,
            "embedding",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

        let exec_start = Instant::now();
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { input: text, model: &self.model });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "embedding", "exec");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding backend returned {status}: {body}");
        }

        let body: EmbeddingResponse = response.json().await?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty data array in embedding response"))?
            .embedding;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_with_retry(text, 0).await
    }

    /// Batches of up to `batch_size` are processed sequentially; within a
    /// batch, calls still run one at a time so the semaphore-gated limiter
    /// is the only concurrency control. Results line up index-for-index
    /// with `texts` — never reordered, never deduplicated.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            for text in batch {
                results.push(self.embed_with_retry(text, batch_index).await?);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;

    fn backend_config() -> ModelBackendConfig {
        ModelBackendConfig {
            base_url: "http://localhost:9999".into(),
            api_key: None,
            text_model: "text".into(),
            vision_model: "vision".into(),
            embedding_model: "embed".into(),
            embedding_dimension: 4,
            chat_temperature: 0.7,
            factual_temperature: 0.1,
            top_p: 0.9,
            max_tokens: 512,
            keep_alive_seconds: 300,
            generation_timeout_seconds: 60,
            embedding_timeout_seconds: 60,
            embedding_batch_size: 0,
            embedding_retry_attempts: 0,
        }
    }

    fn limiters() -> Arc<Limiters> {
        Arc::new(Limiters::new(&LimitsConfig {
            embedding_concurrency: 1,
            vision_concurrency: 1,
            db_search_concurrency: 1,
            llm_generate_concurrency: 1,
            llm_stream_concurrency: 1,
            acquire_timeout_ms: 1000,
        }))
    }

    #[test]
    fn zero_configured_batch_size_and_retries_floor_to_one() {
        let embedder = Embedder::new(&backend_config(), limiters());
        assert_eq!(embedder.batch_size, 1);
        assert_eq!(embedder.retry_attempts, 1);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_result_without_a_backend_call() {
        let embedder = Embedder::new(&backend_config(), limiters());
        let result = embedder.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());

        let single = embedder.embed("").await.unwrap();
        assert!(single.is_empty());
    }
}
