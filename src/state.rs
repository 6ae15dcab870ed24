use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::{ConversationRepository, DbPool, DocumentRepository};
use crate::services::agent::{AgentOrchestrator, FileReaderTool, RagSearchTool, ToolRegistry, WebSearchTool};
use crate::services::{Embedder, HistoryManager, Processor, ResponseCache, Retrieval, TextModelClient, VisionDescriber};
use crate::utils::limiters::Limiters;

/// Application state shared across handlers: every component from
/// SPEC_FULL.md §4 wired together in dependency order, each wrapped in an
/// `Arc` so handlers can cheaply clone what they need.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub documents: Arc<DocumentRepository>,
    pub conversations: Arc<ConversationRepository>,
    pub embedder: Arc<Embedder>,
    pub vision: Arc<VisionDescriber>,
    pub text_model: Arc<TextModelClient>,
    pub retrieval: Arc<Retrieval>,
    pub processor: Arc<Processor>,
    pub history: Arc<HistoryManager>,
    pub cache: Arc<ResponseCache>,
    pub agent: Arc<AgentOrchestrator>,
    pub limiters: Arc<Limiters>,
}

impl AppState {
    pub fn new(config: AppConfig, db_pool: DbPool) -> Self {
        let limiters = Arc::new(Limiters::new(&config.limits));

        let embedder = Arc::new(Embedder::new(&config.model_backend, limiters.clone()));
        let vision = Arc::new(VisionDescriber::new(&config.model_backend, &config.rag, limiters.clone()));
        let text_model = Arc::new(TextModelClient::new(&config.model_backend, limiters.clone()));

        let documents = Arc::new(DocumentRepository::new(db_pool.clone()));
        let conversations = Arc::new(ConversationRepository::new(db_pool.clone()));
        let retrieval = Arc::new(Retrieval::new(db_pool.clone()));

        let processor = Arc::new(Processor::new(
            documents.clone(),
            embedder.clone(),
            vision.clone(),
            text_model.clone(),
            config.rag.clone(),
        ));

        let history = Arc::new(HistoryManager::new(text_model.clone(), config.history.clone()));
        let cache = Arc::new(ResponseCache::new(&config.cache));

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.rag.web_search_timeout_seconds.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RagSearchTool::new(
            retrieval.clone(),
            embedder.clone(),
            config.rag.search_top_k as i64,
            config.rag.search_min_similarity,
        )));
        registry.register(Arc::new(FileReaderTool::new(retrieval.clone(), documents.clone())));
        registry.register(Arc::new(WebSearchTool::new(http_client, config.rag.web_search_max_results)));

        let agent = Arc::new(AgentOrchestrator::new(
            Arc::new(registry),
            text_model.clone(),
            history.clone(),
            config.agent.clone(),
        ));

        Self {
            config,
            db_pool,
            documents,
            conversations,
            embedder,
            vision,
            text_model,
            retrieval,
            processor,
            history,
            cache,
            agent,
            limiters,
        }
    }
}
