pub mod chat;
pub mod document;

pub use chat::{Branch, Chat, Message, MessageKind, MessageRole, Source, MAIN_BRANCH};
pub use document::{
    Chunk, ChunkSearchResult, ContentKind, Document, DocumentMetadata, DocumentSearchResult,
    DocumentStatus,
};
