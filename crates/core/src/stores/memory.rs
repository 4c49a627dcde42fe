use crate::error::StoreError;
use crate::models::{CollectionConfig, Distance, Payload, Point, ScoredPoint};
use crate::traits::VectorStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug)]
struct MemoryCollection {
    config: CollectionConfig,
    points: HashMap<Uuid, (Vec<f32>, Payload)>,
}

/// Exact brute-force store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Request("memory store lock poisoned".to_string())
}

fn similarity(distance: Distance, left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    match distance {
        Distance::Dot => dot,
        Distance::Cosine => {
            let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
            let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
            if left_norm == 0.0 || right_norm == 0.0 {
                0.0
            } else {
                dot / (left_norm * right_norm)
            }
        }
        Distance::Euclid => -left
            .iter()
            .zip(right)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt(),
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.read().map_err(poisoned)?.contains_key(name))
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionConfig>, StoreError> {
        Ok(self
            .collections
            .read()
            .map_err(poisoned)?
            .get(name)
            .map(|collection| collection.config))
    }

    async fn create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        if collections.contains_key(name) {
            return Err(StoreError::Request(format!(
                "collection {name} already exists"
            )));
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                config,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections.write().map_err(poisoned)?.remove(name);
        Ok(())
    }

    async fn upsert_points(&self, name: &str, points: &[Point]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        for point in points {
            if point.vector.len() != collection.config.vector_size {
                return Err(StoreError::DimensionMismatch {
                    expected: collection.config.vector_size,
                    actual: point.vector.len(),
                });
            }
        }
        for point in points {
            collection
                .points
                .insert(point.id, (point.vector.clone(), point.payload.clone()));
        }
        Ok(())
    }

    async fn search_points(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        with_payload: bool,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;

        if vector.len() != collection.config.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: collection.config.vector_size,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<ScoredPoint> = collection
            .points
            .iter()
            .map(|(id, (stored, payload))| ScoredPoint {
                id: id.to_string(),
                score: similarity(collection.config.distance, vector, stored),
                payload: with_payload.then(|| payload.clone()),
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.id.cmp(&right.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count_points(&self, name: &str) -> Result<usize, StoreError> {
        self.collections
            .read()
            .map_err(poisoned)?
            .get(name)
            .map(|collection| collection.points.len())
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }
}
