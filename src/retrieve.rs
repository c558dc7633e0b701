//! Top-k passage retrieval.
//!
//! Embeds the query with the same model the index was built with, asks the
//! [`VectorIndex`] for the nearest chunks and attaches each chunk's bracket
//! citations. Scores are passed through exactly as the index reports them.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::citations::parse_citations;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::models::RetrievedPassage;

pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// The `k` passages nearest to `query`, best first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, k)?;
        info!(index = self.index.name(), k, hits = hits.len(), "retrieved passages");

        Ok(hits
            .into_iter()
            .map(|(chunk, similarity_score)| {
                let citation_refs = parse_citations(&chunk.text);
                RetrievedPassage {
                    chunk,
                    similarity_score,
                    citation_refs,
                }
            })
            .collect())
    }
}

/// Render passages for display:
///
/// ```text
/// Chunk 1 (Similarity: 0.8123):
/// Citations: 5, 10, 11
/// <chunk text>
/// ```
///
/// The `Citations` line is omitted when the chunk cites nothing. Passages are
/// separated by a blank line.
pub fn format_passages(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, passage)| {
            let mut block = format!(
                "Chunk {} (Similarity: {:.4}):\n",
                i + 1,
                passage.similarity_score
            );
            if !passage.citation_refs.is_empty() {
                block.push_str(&format!("Citations: {}\n", passage.citation_refs_display()));
            }
            block.push_str(&passage.chunk.text);
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
