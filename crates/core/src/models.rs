use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

pub type Payload = Map<String, Value>;

/// Field map of one row from the origin table, as read at indexing time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Map<String, Value>);

impl SourceRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for SourceRecord {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl FromIterator<(String, Value)> for SourceRecord {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    Flight,
    Hotel,
    CarRental,
    Excursion,
    Faq,
    Other(String),
}

const COLLECTION_SUFFIX: &str = "_collection";

impl EntityType {
    pub fn table_name(&self) -> &str {
        match self {
            EntityType::Flight => "flights",
            EntityType::Hotel => "hotels",
            EntityType::CarRental => "car_rentals",
            EntityType::Excursion => "trip_recommendations",
            EntityType::Faq => "faq",
            EntityType::Other(table) => table,
        }
    }

    pub fn collection_name(&self) -> String {
        match self {
            EntityType::Flight => "flights_collection".to_string(),
            EntityType::Hotel => "hotels_collection".to_string(),
            EntityType::CarRental => "car_rentals_collection".to_string(),
            EntityType::Excursion => "excursions_collection".to_string(),
            EntityType::Faq => "faq_collection".to_string(),
            EntityType::Other(table) => format!("{table}{COLLECTION_SUFFIX}"),
        }
    }
}

/// Accepts either a table name (`flights`) or a collection name
/// (`flights_collection`); anything unrecognized becomes [`EntityType::Other`].
impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        let base = trimmed.strip_suffix(COLLECTION_SUFFIX).unwrap_or(trimmed);
        match base {
            "flights" | "flight" => EntityType::Flight,
            "hotels" | "hotel" => EntityType::Hotel,
            "car_rentals" | "car_rental" => EntityType::CarRental,
            "excursions" | "excursion" | "trip_recommendations" => EntityType::Excursion,
            "faq" | "faqs" => EntityType::Faq,
            other => EntityType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: SourceRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub vector_size: usize,
    pub distance: Distance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl Point {
    /// Payload is the chunk metadata plus a `content` field holding the chunk
    /// text; `content` always reflects the chunk even if the record had one.
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        let mut payload = chunk.metadata.into_fields();
        payload.insert("content".to_string(), Value::String(chunk.text));
        Self {
            id: Uuid::new_v4(),
            vector,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    pub with_payload: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            with_payload: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Option<Payload>,
}

impl SearchHit {
    pub fn content(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("content"))
            .and_then(Value::as_str)
    }
}

impl From<ScoredPoint> for SearchHit {
    fn from(value: ScoredPoint) -> Self {
        Self {
            id: value.id,
            score: value.score,
            payload: value.payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: usize,
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingReport {
    pub collection: String,
    pub points_indexed: usize,
    pub skipped: usize,
    pub batches: Vec<BatchReport>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IndexingReport {
    pub(crate) fn start(collection: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            collection: collection.into(),
            points_indexed: 0,
            skipped: 0,
            batches: Vec::new(),
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn record_batch(&mut self, indexed: usize, skipped: usize) -> BatchReport {
        let report = BatchReport {
            batch: self.batches.len() + 1,
            indexed,
            skipped,
        };
        self.points_indexed += indexed;
        self.skipped += skipped;
        self.batches.push(report);
        report
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}
