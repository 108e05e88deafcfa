use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use crate::config::ChunkStrategy;
use crate::document::parser::TextBlock;

/// Cheap whitespace-based token estimate. Good enough for the context
/// budget the RAG Orchestrator enforces on the query side; not a
/// tokenizer-accurate count.
fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Aggregated per-chunk metadata (spec.md §4.3): the blocks a chunk was
/// assembled from, summarized rather than kept by reference, so a chunk
/// can be persisted and re-read without the originating blocks.
#[derive(Debug, Clone, Default)]
pub struct ChunkMetadata {
    pub block_count: usize,
    pub total_length: usize,
    pub mean_importance: f64,
    pub block_types: Vec<&'static str>,
    pub sections: Vec<String>,
    pub pages: Vec<usize>,
}

fn aggregate_metadata(blocks: &[&TextBlock]) -> ChunkMetadata {
    if blocks.is_empty() {
        return ChunkMetadata::default();
    }

    let total_length: usize = blocks.iter().map(|b| b.text.len()).sum();
    let mean_importance =
        blocks.iter().map(|b| b.importance).sum::<f64>() / blocks.len() as f64;

    let mut block_types: Vec<&'static str> = blocks.iter().map(|b| b.block_type.as_str()).collect();
    block_types.sort_unstable();
    block_types.dedup();

    let sections: BTreeSet<String> = blocks.iter().filter_map(|b| b.section.clone()).collect();
    let pages: BTreeSet<usize> = blocks.iter().filter_map(|b| b.page).collect();

    ChunkMetadata {
        block_count: blocks.len(),
        total_length,
        mean_importance: (mean_importance * 100.0).round() / 100.0,
        block_types,
        sections: sections.into_iter().collect(),
        pages: pages.into_iter().collect(),
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub char_count: usize,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

fn make_chunk(index: usize, blocks: &[&TextBlock]) -> Chunk {
    let content = blocks
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Chunk {
        index,
        char_count: content.len(),
        token_count: estimate_tokens(&content),
        metadata: aggregate_metadata(blocks),
        content,
    }
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    strategy: ChunkStrategy,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, strategy: ChunkStrategy) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            strategy,
        }
    }

    /// Chunk an ordered list of Text Blocks (spec.md §4.3). Every block's
    /// text ends up in at least one chunk regardless of strategy; only
    /// `Fixed` is allowed to split a single block's text across chunk
    /// boundaries, since it operates on raw character windows rather
    /// than block boundaries.
    pub fn chunk(&self, blocks: &[TextBlock]) -> Result<Vec<Chunk>> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        debug!(blocks = blocks.len(), strategy = ?self.strategy, "chunking blocks");

        let chunks = match self.strategy {
            ChunkStrategy::Semantic => self.chunk_semantic(blocks),
            ChunkStrategy::Sentence => self.chunk_sentence(blocks),
            ChunkStrategy::Paragraph => self.chunk_paragraph(blocks),
            ChunkStrategy::Fixed => self.chunk_fixed(blocks),
        };

        debug!(chunks = chunks.len(), "produced chunks");
        Ok(chunks)
    }

    /// One chunk per block — the block boundaries the extractor already
    /// decided are exactly the retrieval units.
    fn chunk_paragraph(&self, blocks: &[TextBlock]) -> Vec<Chunk> {
        blocks
            .iter()
            .enumerate()
            .map(|(i, b)| make_chunk(i, &[b]))
            .collect()
    }

    /// Default strategy: buffer whole blocks up to `chunk_size` chars.
    /// When the next block would overflow the buffer, flush it as a
    /// chunk and reseed the next buffer with however many trailing
    /// blocks fit within `chunk_overlap` chars, so consecutive chunks
    /// share context instead of cutting cleanly at the boundary.
    fn chunk_semantic(&self, blocks: &[TextBlock]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut buffer: Vec<&TextBlock> = Vec::new();
        let mut buffer_len = 0usize;

        for block in blocks {
            let block_len = block.text.len();

            if !buffer.is_empty() && buffer_len + block_len > self.chunk_size {
                chunks.push(make_chunk(chunks.len(), &buffer));
                buffer = overlap_tail(&buffer, self.chunk_overlap);
                buffer_len = buffer.iter().map(|b| b.text.len()).sum();
            }

            buffer.push(block);
            buffer_len += block_len;
        }

        if !buffer.is_empty() {
            chunks.push(make_chunk(chunks.len(), &buffer));
        }

        chunks
    }

    /// Splits each block into sentences, then groups consecutive
    /// sentences up to `chunk_size` chars with a 2-sentence overlap
    /// carried into the next chunk.
    fn chunk_sentence(&self, blocks: &[TextBlock]) -> Vec<Chunk> {
        const OVERLAP_SENTENCES: usize = 2;

        let sentences: Vec<(&TextBlock, String)> = blocks
            .iter()
            .flat_map(|b| split_sentences(&b.text).into_iter().map(move |s| (b, s)))
            .collect();

        if sentences.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<(&TextBlock, String)> = Vec::new();
        let mut current_len = 0usize;

        for (block, sentence) in sentences {
            let sentence_len = sentence.len();

            if !current.is_empty() && current_len + sentence_len > self.chunk_size {
                chunks.push(make_sentence_chunk(chunks.len(), &current));
                let keep_from = current.len().saturating_sub(OVERLAP_SENTENCES);
                current = current.split_off(keep_from);
                current_len = current.iter().map(|(_, s)| s.len()).sum();
            }

            current_len += sentence_len;
            current.push((block, sentence));
        }

        if !current.is_empty() {
            chunks.push(make_sentence_chunk(chunks.len(), &current));
        }

        chunks
    }

    /// Character-windowed chunking over the concatenation of all block
    /// text. The only strategy that may split a block's text across
    /// chunk boundaries; metadata for a window is aggregated from every
    /// block whose span overlaps it.
    fn chunk_fixed(&self, blocks: &[TextBlock]) -> Vec<Chunk> {
        let mut full_text = String::new();
        let mut spans: Vec<(usize, usize, &TextBlock)> = Vec::new();

        for block in blocks {
            if !full_text.is_empty() {
                full_text.push_str("\n\n");
            }
            let start = full_text.len();
            full_text.push_str(&block.text);
            spans.push((start, full_text.len(), block));
        }

        let chars: Vec<char> = full_text.chars().collect();
        let total_chars = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + self.chunk_size).min(total_chars);
            let content: String = chars[start..end].iter().collect();

            let touched: Vec<&TextBlock> = spans
                .iter()
                .filter(|(s, e, _)| *s < end && *e > start)
                .map(|(_, _, b)| *b)
                .collect();

            chunks.push(Chunk {
                index: chunks.len(),
                char_count: content.len(),
                token_count: estimate_tokens(&content),
                metadata: aggregate_metadata(&touched),
                content,
            });

            if end >= total_chars {
                break;
            }
            start += self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        }

        chunks
    }
}

/// Trailing blocks from a just-flushed buffer whose combined length is
/// within `overlap` chars, kept as the seed for the next chunk.
fn overlap_tail<'a>(buffer: &[&'a TextBlock], overlap: usize) -> Vec<&'a TextBlock> {
    if overlap == 0 {
        return Vec::new();
    }

    let mut kept = Vec::new();
    let mut len = 0usize;
    for block in buffer.iter().rev() {
        if len + block.text.len() > overlap && !kept.is_empty() {
            break;
        }
        len += block.text.len();
        kept.push(*block);
    }
    kept.reverse();
    kept
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }

    let trailing = current.trim().to_string();
    if !trailing.is_empty() {
        sentences.push(trailing);
    }

    sentences
}

fn make_sentence_chunk(index: usize, sentences: &[(&TextBlock, String)]) -> Chunk {
    let content = sentences
        .iter()
        .map(|(_, s)| s.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let blocks: Vec<&TextBlock> = {
        let mut seen = Vec::new();
        for (b, _) in sentences {
            if !seen.iter().any(|existing: &&TextBlock| std::ptr::eq(*existing, *b)) {
                seen.push(*b);
            }
        }
        seen
    };

    Chunk {
        index,
        char_count: content.len(),
        token_count: estimate_tokens(&content),
        metadata: aggregate_metadata(&blocks),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parser::BlockType;

    fn block(text: &str, block_type: BlockType) -> TextBlock {
        TextBlock::new(text.to_string(), block_type, None, None)
    }

    #[test]
    fn empty_blocks_produce_no_chunks() {
        let chunker = TextChunker::new(100, 10, ChunkStrategy::Semantic);
        assert!(chunker.chunk(&[]).unwrap().is_empty());
    }

    #[test]
    fn paragraph_strategy_emits_one_chunk_per_block() {
        let blocks = vec![
            block("First block.", BlockType::Paragraph),
            block("Second block.", BlockType::Paragraph),
        ];
        let chunker = TextChunker::new(1000, 0, ChunkStrategy::Paragraph);
        let chunks = chunker.chunk(&blocks).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "First block.");
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn semantic_strategy_covers_every_block_and_indexes_contiguously() {
        let blocks = vec![
            block(&"a".repeat(40), BlockType::Paragraph),
            block(&"b".repeat(40), BlockType::Paragraph),
            block(&"c".repeat(40), BlockType::Paragraph),
        ];
        let chunker = TextChunker::new(60, 10, ChunkStrategy::Semantic);
        let chunks = chunker.chunk(&blocks).unwrap();

        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(joined.contains(&"a".repeat(40)));
        assert!(joined.contains(&"b".repeat(40)));
        assert!(joined.contains(&"c".repeat(40)));
    }

    #[test]
    fn sentence_strategy_splits_on_sentence_boundaries() {
        let blocks = vec![block(
            "Sentence one. Sentence two. Sentence three. Sentence four.",
            BlockType::Paragraph,
        )];
        let chunker = TextChunker::new(30, 10, ChunkStrategy::Sentence);
        let chunks = chunker.chunk(&blocks).unwrap();

        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.metadata.block_count >= 1));
    }

    #[test]
    fn fixed_strategy_can_split_a_block_across_chunks() {
        let blocks = vec![block(&"x".repeat(25), BlockType::Paragraph)];
        let chunker = TextChunker::new(10, 2, ChunkStrategy::Fixed);
        let chunks = chunker.chunk(&blocks).unwrap();

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.char_count <= 10);
            assert_eq!(c.metadata.block_count, 1);
        }
    }

    #[test]
    fn chunk_metadata_aggregates_block_types_and_importance() {
        let blocks = vec![
            block("Title Line", BlockType::Title),
            block("Body paragraph with more than a few words in it.", BlockType::Paragraph),
        ];
        let chunker = TextChunker::new(1000, 0, ChunkStrategy::Semantic);
        let chunks = chunker.chunk(&blocks).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.block_count, 2);
        assert!(chunks[0].metadata.block_types.contains(&"title"));
        assert!(chunks[0].metadata.block_types.contains(&"paragraph"));
        assert!(chunks[0].metadata.mean_importance > 0.0);
    }
}
