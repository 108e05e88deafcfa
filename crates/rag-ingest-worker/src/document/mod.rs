pub mod loader;
pub mod parser;
pub mod chunker;

pub use loader::DocumentLoader;
pub use parser::{BlockType, DocumentParser, TextBlock};
pub use chunker::{Chunk, ChunkMetadata, TextChunker};
