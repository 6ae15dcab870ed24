use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub model_backend: ModelBackendConfig,
    pub rag: RagConfig,
    pub history: HistoryConfig,
    pub cache: CacheConfig,
    pub agent: AgentConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

/// Configuration for the external text/vision/embedding model backend.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelBackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub text_model: String,
    pub vision_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_temperature: f32,
    pub factual_temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub keep_alive_seconds: u64,
    pub generation_timeout_seconds: u64,
    pub embedding_timeout_seconds: u64,
    pub embedding_batch_size: usize,
    pub embedding_retry_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub search_top_k: usize,
    pub search_min_similarity: f32,
    pub hybrid_vector_weight: f32,
    pub hybrid_text_weight: f32,
    pub vision_batch_size: usize,
    pub vision_min_pixels: u32,
    pub vision_min_dimension: u32,
    pub vision_model_min_dimension: u32,
    pub vision_context_chars: usize,
    /// Advisory only (see SPEC_FULL.md §9): does not currently gate description.
    pub vision_gating_enabled: bool,
    pub vision_min_area_ratio: f32,
    pub summary_chunk_limit: usize,
    pub web_search_timeout_seconds: u64,
    pub web_search_max_results: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    pub max_history_tokens: usize,
    pub summarize_after_messages: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub vision_concurrency: usize,
    pub db_search_concurrency: usize,
    pub llm_generate_concurrency: usize,
    pub llm_stream_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: AppConfig = config.try_deserialize()?;
        Ok(settings)
    }
}
