pub mod settings;

pub use settings::{
    AgentConfig, AppConfig, CacheConfig, DatabaseConfig, HistoryConfig, LimitsConfig,
    ModelBackendConfig, RagConfig, ServerConfig,
};
