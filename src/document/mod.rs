pub mod chunker;
pub mod extractor;
pub mod sanitize;

pub use chunker::{ChunkStrategy, Chunker, ChunkerConfig, RawChunk};
pub use extractor::{ExtractedDocument, ExtractedImage, ExtractedPage, Extractor, ImageRect};
pub use sanitize::sanitize_text;
