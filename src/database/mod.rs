pub mod conversation_repository;
pub mod document_repository;
pub mod pool;

pub use conversation_repository::ConversationRepository;
pub use document_repository::DocumentRepository;
pub use pool::DbPool;
