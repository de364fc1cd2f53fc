//! In-memory vector index over one document's chunks.
//!
//! One index is built per upload and never updated incrementally. Search is
//! brute-force cosine similarity, which is plenty for documents within the
//! upload size limit.

use std::time::Instant;

use tracing::info;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, EmbedError, Embedder};
use crate::models::{Chunk, ScoredChunk};

#[derive(Debug)]
struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            entries: Vec::new(),
        }
    }

    /// Appends a chunk and its vector. Entries keep insertion order.
    pub fn insert(&mut self, chunk: Chunk, vector: Vec<f32>) {
        self.entries.push(IndexEntry { chunk, vector });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// Returns up to `k` chunks by descending similarity to `query`.
    ///
    /// Equal scores keep insertion (document) order. If `k` exceeds the
    /// number of chunks, every chunk is returned.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }
}

/// Chunk `text`, embed every chunk, and load the results into a fresh index.
///
/// Empty text produces an empty index without calling the embedder.
pub async fn build_index(
    text: &str,
    chunking: &ChunkingConfig,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<VectorIndex, EmbedError> {
    let started = Instant::now();
    let chunks = chunk_document(text, chunking);
    let mut index = VectorIndex::new(embedder.model_name(), embedder.dims());

    let batch_size = batch_size.max(1);
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        for (chunk, vector) in batch.iter().cloned().zip(vectors) {
            index.insert(chunk, vector);
        }
    }

    info!(
        chunks = index.len(),
        model = %index.model(),
        latency_ms = started.elapsed().as_millis(),
        "index built"
    );

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            start: 0,
            end: text.chars().count(),
            text: text.to_string(),
            hash: String::new(),
        }
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
        inner: HashEmbedder,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let mut index = VectorIndex::new("test", 2);
        index.insert(chunk(0, "a"), vec![0.0, 1.0]);
        index.insert(chunk(1, "b"), vec![1.0, 0.0]);
        index.insert(chunk(2, "c"), vec![0.7, 0.7]);

        let hits = index.search(&[1.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn ties_keep_chunk_order() {
        let mut index = VectorIndex::new("test", 2);
        for i in 0..5 {
            index.insert(chunk(i, "same"), vec![1.0, 1.0]);
        }
        let order: Vec<usize> = index
            .search(&[1.0, 1.0], 3)
            .iter()
            .map(|h| h.chunk.index)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn k_larger_than_index_returns_all_without_padding() {
        let mut index = VectorIndex::new("test", 2);
        index.insert(chunk(0, "a"), vec![1.0, 0.0]);
        index.insert(chunk(1, "b"), vec![0.0, 1.0]);
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 2);
    }

    #[tokio::test]
    async fn empty_text_builds_empty_index_without_embedding() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            inner: HashEmbedder::new(16),
        };
        let index = build_index("", &ChunkingConfig::default(), &embedder, 64)
            .await
            .unwrap();
        assert!(index.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn build_embeds_in_batches() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            inner: HashEmbedder::new(16),
        };
        let text = "lorem ipsum dolor sit amet ".repeat(200);
        let chunking = ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 20,
        };
        let index = build_index(&text, &chunking, &embedder, 4).await.unwrap();
        let expected_calls = index.len().div_ceil(4);
        assert!(index.len() > 4);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), expected_calls);
        let indices: Vec<usize> = index.chunks().map(|c| c.index).collect();
        assert_eq!(indices, (0..index.len()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn build_is_idempotent() {
        let embedder = HashEmbedder::new(32);
        let text = "alpha beta gamma. ".repeat(100);
        let cfg = ChunkingConfig::default();
        let a = build_index(&text, &cfg, &embedder, 8).await.unwrap();
        let b = build_index(&text, &cfg, &embedder, 8).await.unwrap();
        let query = embedder.embed_one("gamma");
        let ha: Vec<(usize, f32)> = a.search(&query, 3).iter().map(|h| (h.chunk.index, h.score)).collect();
        let hb: Vec<(usize, f32)> = b.search(&query, 3).iter().map(|h| (h.chunk.index, h.score)).collect();
        assert_eq!(ha, hb);
        assert!(a.chunks().zip(b.chunks()).all(|(x, y)| x == y));
    }
}
