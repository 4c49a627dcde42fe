use crate::models::Distance;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("invalid vector size {0}: must be greater than zero")]
    InvalidVectorSize(usize),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("distance mismatch: collection uses {expected:?}, got {actual:?}")]
    DistanceMismatch { expected: Distance, actual: Distance },

    #[error("invalid response from {backend} ({status}): {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

impl StoreError {
    /// Timeouts, connection failures, 429 and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(error) => is_transient_http(error),
            StoreError::BackendResponse { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("encoder returned {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("encoder http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding worker failed: {0}")]
    Worker(String),

    #[error("embedding engine has been shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetching {url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(error) => is_transient_http(error),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Url(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("record source error: {0}")]
    Source(#[from] SourceError),

    #[error("document fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("upsert failed after {committed} points were committed: {source}")]
    Upsert {
        committed: usize,
        #[source]
        source: StoreError,
    },

    #[error("embedding engine error: {0}")]
    Embed(#[from] EmbedError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("could not embed query: {0}")]
    Embed(#[from] EmbedError),

    #[error("search failed: {0}")]
    Store(#[from] StoreError),
}

fn is_transient_http(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    error
        .status()
        .is_some_and(|status| status.is_server_error() || status.as_u16() == 429)
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
