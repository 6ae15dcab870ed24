pub mod agent;
pub mod embedding;
pub mod history;
pub mod processor;
pub mod response_cache;
pub mod retrieval;
pub mod text_model;
pub mod vision;

pub use agent::{AgentOrchestrator, ToolRegistry};
pub use embedding::{Embedder, EmbeddingProvider};
pub use history::HistoryManager;
pub use processor::{DocumentStore, Processor};
pub use response_cache::ResponseCache;
pub use retrieval::Retrieval;
pub use text_model::TextModelClient;
pub use vision::VisionDescriber;
