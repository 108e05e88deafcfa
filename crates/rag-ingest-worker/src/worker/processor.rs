use anyhow::Result;
use pgvector::Vector;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::database::{ChunkInsert, Repository};
use crate::document::{DocumentLoader, DocumentParser, TextChunker};
use crate::embedding::EmbeddingService;
use crate::storage::FsStorage;
use crate::utils::error::WorkerError;
use crate::utils::metrics::{Metrics, Timer};

/// Ingestion Worker (C6) document pipeline: load raw bytes, extract
/// text (C2), chunk (C3), embed (C4), and persist — replacing whatever
/// chunks the document previously had.
pub struct DocumentProcessor {
    settings: Settings,
    repository: Arc<Repository>,
    storage: Arc<FsStorage>,
    embedding: Arc<EmbeddingService>,
    metrics: Metrics,
}

impl DocumentProcessor {
    pub fn new(
        settings: Settings,
        repository: Arc<Repository>,
        storage: Arc<FsStorage>,
        embedding: Arc<EmbeddingService>,
        metrics: Metrics,
    ) -> Self {
        Self {
            settings,
            repository,
            storage,
            embedding,
            metrics,
        }
    }

    pub async fn process_document(&self, document_id: Uuid) -> Result<()> {
        info!(%document_id, "processing document");
        let timer = Timer::new();

        let result = self.process_document_inner(document_id).await;

        self.metrics.add_processing_time(timer.elapsed());
        match &result {
            Ok(()) => self.metrics.increment_documents_processed(),
            Err(_) => self.metrics.increment_documents_failed(),
        }
        result
    }

    async fn process_document_inner(&self, document_id: Uuid) -> Result<()> {
        let document = self
            .repository
            .get_document(document_id)
            .await?
            .ok_or(WorkerError::DocumentNotFound(document_id))?;

        self.repository.mark_document_processing(document_id).await?;

        let extension = DocumentLoader::extension_from_key(&document.storage_key);
        let bytes = self.storage.read(&document.storage_key).await?;

        DocumentLoader::validate_bytes(&bytes, extension.as_deref(), self.settings.worker.max_file_size_mb)?;

        let blocks = DocumentParser::parse(&bytes, extension.as_deref())?;

        if blocks.is_empty() {
            warn!(%document_id, "document has no extractable text");
            self.repository.upsert_chunks(document_id, Vec::new()).await?;
            self.repository.mark_document_done(document_id, 0).await?;
            return Ok(());
        }

        let chunker = TextChunker::new(
            self.settings.chunking.size,
            self.settings.chunking.overlap,
            self.settings.chunking.strategy,
        );
        let chunks = chunker.chunk(&blocks)?;

        if chunks.is_empty() {
            warn!(%document_id, "document produced no chunks");
            self.repository.upsert_chunks(document_id, Vec::new()).await?;
            self.repository.mark_document_done(document_id, 0).await?;
            return Ok(());
        }

        info!(%document_id, chunk_count = chunks.len(), "generating embeddings");
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedding.embed_batch(&texts).await?;
        self.metrics.add_embeddings_generated(embeddings.len() as u64);

        let inserts: Vec<ChunkInsert> = chunks
            .into_iter()
            .zip(embeddings.into_iter())
            .map(|(chunk, embedding)| ChunkInsert {
                id: Uuid::new_v4(),
                workspace_id: document.workspace_id,
                document_id,
                document_title: document.title.clone(),
                chunk_index: chunk.index as i32,
                content: chunk.content,
                token_count: chunk.token_count as i32,
                embedding: Vector::from(embedding),
            })
            .collect();

        let chunk_count = inserts.len() as i64;
        self.repository.upsert_chunks(document_id, inserts).await?;
        self.repository.mark_document_done(document_id, chunk_count).await?;
        self.metrics.add_chunks_created(chunk_count as u64);

        info!(%document_id, chunk_count, "document processed");
        Ok(())
    }
}
