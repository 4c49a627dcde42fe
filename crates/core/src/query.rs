use crate::chunking::normalize_whitespace;
use crate::collection::CollectionManager;
use crate::embeddings::EmbeddingEngine;
use crate::error::QueryError;
use crate::models::{SearchHit, SearchQuery};
use crate::traits::VectorStore;
use std::sync::Arc;
use tracing::debug;

/// Read side of the pipeline: embeds a query with the same engine used for
/// indexing and returns the nearest stored chunks.
pub struct QueryService<S> {
    manager: Arc<CollectionManager<S>>,
    engine: EmbeddingEngine,
    score_threshold: Option<f32>,
}

impl<S> QueryService<S>
where
    S: VectorStore + Send + Sync,
{
    pub fn new(manager: Arc<CollectionManager<S>>, engine: EmbeddingEngine) -> Self {
        Self {
            manager,
            engine,
            score_threshold: None,
        }
    }

    /// Drops hits scoring below `threshold`.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    pub async fn search(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, QueryError> {
        self.search_with(collection, &SearchQuery::new(text, limit))
            .await
    }

    pub async fn search_with(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QueryError> {
        let vector = self.engine.embed(&normalize_whitespace(&query.text)).await?;
        let hits = self
            .manager
            .search(collection, &vector, query.limit, query.with_payload)
            .await?;

        let hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| self.score_threshold.map_or(true, |min| hit.score >= min))
            .map(SearchHit::from)
            .collect();
        debug!(collection, limit = query.limit, hits = hits.len(), "search finished");
        Ok(hits)
    }
}
