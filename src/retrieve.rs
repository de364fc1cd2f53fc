//! Top-k retrieval against a session's index.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, EmbedError, Embedder};
use crate::index::VectorIndex;
use crate::models::ScoredChunk;

/// Outcome of a retrieval.
#[derive(Debug)]
pub enum Retrieval {
    /// No index, or an index with no chunks.
    NoDocument,
    /// Best matches first; ties in document order.
    Hits(Vec<ScoredChunk>),
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            embedder,
            top_k: top_k.max(1),
        }
    }

    /// Embeds `query` and returns the `top_k` most similar chunks.
    ///
    /// An absent or empty index yields [`Retrieval::NoDocument`] without
    /// calling the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        index: Option<&VectorIndex>,
    ) -> Result<Retrieval, EmbedError> {
        let index = match index {
            Some(index) if !index.is_empty() => index,
            _ => return Ok(Retrieval::NoDocument),
        };

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let hits = index.search(&query_vec, self.top_k);
        debug!(
            hits = hits.len(),
            best = hits.first().map(|h| h.score).unwrap_or(0.0),
            "retrieved chunks"
        );
        Ok(Retrieval::Hits(hits))
    }
}
