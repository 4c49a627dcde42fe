use crate::error::{FetchError, SourceError, StoreError};
use crate::models::{CollectionConfig, EntityType, Point, ScoredPoint, SourceRecord};
use async_trait::async_trait;

/// A vector database with named, fixed-size collections.
#[async_trait]
pub trait VectorStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// `None` when the collection does not exist.
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionConfig>, StoreError>;

    async fn create_collection(&self, name: &str, config: CollectionConfig)
        -> Result<(), StoreError>;

    /// Deleting a missing collection is not an error.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn upsert_points(&self, name: &str, points: &[Point]) -> Result<(), StoreError>;

    async fn search_points(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        with_payload: bool,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    async fn count_points(&self, name: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait RecordSource {
    async fn list_records(&self, entity: &EntityType) -> Result<Vec<SourceRecord>, SourceError>;
}

#[async_trait]
pub trait DocumentFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}
