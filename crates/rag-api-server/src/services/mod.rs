pub mod embed_issuer;
pub mod embedding_service;
pub mod generator;
pub mod quota;
pub mod rag_orchestrator;
pub mod rerank_service;
pub mod retrieval;
pub mod storage;
pub mod vector_store;

pub use embed_issuer::EmbedCodeIssuer;
pub use embedding_service::EmbeddingService;
pub use generator::GeneratorAdapter;
pub use quota::QuotaManager;
pub use rag_orchestrator::RagOrchestrator;
pub use rerank_service::RerankService;
pub use retrieval::{RetrievalEngine, RetrievalMode};
pub use storage::FsStorage;
pub use vector_store::VectorStore;
