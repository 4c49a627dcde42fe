//! Collection lifecycle on top of a [`VectorStore`].
//!
//! The manager validates names and vector sizes before anything reaches the
//! backend, and hands out one async mutex per collection name so that a
//! recreate can never interleave with another run's upserts.

use crate::error::StoreError;
use crate::models::{CollectionConfig, Distance, Point, ScoredPoint};
use crate::traits::VectorStore;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

fn collection_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("static regex is valid"))
}

pub fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    if collection_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidCollectionName(name.to_string()))
    }
}

pub struct CollectionManager<S> {
    store: S,
    write_guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<S> CollectionManager<S>
where
    S: VectorStore + Send + Sync,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Exclusive write access to `name` until the guard is dropped.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self
                .write_guards
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(guards.entry(name.to_string()).or_default())
        };
        guard.lock_owned().await
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        validate_collection_name(name)?;
        self.store.collection_exists(name).await
    }

    pub async fn config(&self, name: &str) -> Result<CollectionConfig, StoreError> {
        validate_collection_name(name)?;
        self.store
            .collection_info(name)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    /// Drops `name` if present and creates it empty with the given layout.
    /// Calling it repeatedly always ends in the same empty state.
    pub async fn create_or_recreate(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<(), StoreError> {
        validate_collection_name(name)?;
        if vector_size == 0 {
            return Err(StoreError::InvalidVectorSize(vector_size));
        }

        if self.store.collection_exists(name).await? {
            info!(collection = name, "collection already exists, recreating it");
            self.store.delete_collection(name).await?;
        }

        self.store
            .create_collection(
                name,
                CollectionConfig {
                    vector_size,
                    distance,
                },
            )
            .await?;
        info!(collection = name, vector_size, ?distance, "created collection");
        Ok(())
    }

    /// Writes `points` as given; batching and retries belong to the caller.
    pub async fn upsert(&self, name: &str, points: &[Point]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let config = self.config(name).await?;
        if let Some(point) = points
            .iter()
            .find(|point| point.vector.len() != config.vector_size)
        {
            return Err(StoreError::DimensionMismatch {
                expected: config.vector_size,
                actual: point.vector.len(),
            });
        }

        self.store.upsert_points(name, points).await?;
        debug!(collection = name, points = points.len(), "upserted points");
        Ok(())
    }

    /// Up to `limit` points, most similar first.
    pub async fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        limit: usize,
        with_payload: bool,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let config = self.config(name).await?;
        if query_vector.len() != config.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: config.vector_size,
                actual: query_vector.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self
            .store
            .search_points(name, query_vector, limit, with_payload)
            .await?;
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn count(&self, name: &str) -> Result<usize, StoreError> {
        validate_collection_name(name)?;
        self.store.count_points(name).await
    }
}
