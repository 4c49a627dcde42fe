pub mod cancel;
pub mod chunking;
pub mod collection;
pub mod embeddings;
pub mod error;
pub mod formatter;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod retry;
pub mod sources;
pub mod stores;
pub mod traits;

pub use cancel::CancellationToken;
pub use chunking::{normalize_whitespace, split_sections, Chunker, ChunkingConfig};
pub use collection::{validate_collection_name, CollectionManager};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingEngine, Encoder, HttpEncoder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_WORKERS,
};
pub use error::{EmbedError, FetchError, IndexError, QueryError, SourceError, StoreError};
pub use formatter::ContentFormatter;
pub use models::{
    BatchReport, Chunk, CollectionConfig, Distance, EntityType, IndexingReport, Payload, Point,
    ScoredPoint, SearchHit, SearchQuery, SourceRecord,
};
pub use orchestrator::{IndexingOptions, IndexingOrchestrator, DEFAULT_BATCH_SIZE};
pub use query::QueryService;
pub use retry::RetryPolicy;
pub use sources::{HttpDocumentFetcher, SqliteRecordSource, StaticRecordSource};
pub use stores::{MemoryStore, QdrantStore};
pub use traits::{DocumentFetcher, RecordSource, VectorStore};
