use crate::error::EmbedError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Output size of all-MiniLM-L6-v2, the encoder the collections were built with.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_EMBEDDING_WORKERS: usize = 8;

const WARM_UP_TEXT: &str = "warm up";

/// Synchronous text encoder. Implementations may block; callers on an async
/// runtime go through [`EmbeddingEngine`].
pub trait Encoder {
    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn encode_batch(&self, texts: &[&str]) -> Vec<Result<Vec<f32>, EmbedError>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Encoder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        // Texts shorter than a trigram still get a non-zero vector.
        let windows: Vec<&[char]> = if chars.len() < 3 {
            vec![chars.as_slice()]
        } else {
            chars.windows(3).collect()
        };

        for window in windows {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

/// Client for a text-embeddings-inference style endpoint:
/// `POST {endpoint}` with `{"inputs": [...]}` answering `[[f32, ...], ...]`.
///
/// Uses reqwest's blocking client, so it must only be driven from a blocking
/// thread (which is what [`EmbeddingEngine`] does).
#[derive(Debug, Clone)]
pub struct HttpEncoder {
    endpoint: String,
    dimensions: usize,
    model_id: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    inputs: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct EncodeResponse(Vec<Vec<f32>>);

impl HttpEncoder {
    pub fn new(endpoint: impl Into<String>, dimensions: usize) -> Self {
        let endpoint = endpoint.into();
        Self {
            model_id: endpoint.clone(),
            endpoint,
            dimensions,
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        let mut request = client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&EncodeRequest { inputs: texts });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(EmbedError::Encoder(format!(
                "encoder request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let EncodeResponse(vectors) = response.json()?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::Encoder(format!(
                "encoder returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn check(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
        if vector.len() != self.dimensions {
            return Err(EmbedError::Dimension {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

impl Encoder for HttpEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let vector = self
            .request(&[text])?
            .pop()
            .ok_or_else(|| EmbedError::Encoder("encoder returned no vectors".to_string()))?;
        self.check(vector)
    }

    fn encode_batch(&self, texts: &[&str]) -> Vec<Result<Vec<f32>, EmbedError>> {
        let valid: Vec<&str> = texts
            .iter()
            .copied()
            .filter(|text| !text.trim().is_empty())
            .collect();
        if valid.is_empty() {
            return texts.iter().map(|_| Err(EmbedError::EmptyInput)).collect();
        }

        let mut encoded = match self.request(&valid) {
            Ok(vectors) => vectors.into_iter(),
            // One bad request would otherwise fail every item; retry them
            // individually so the failure stays with the item that caused it.
            Err(_) if valid.len() > 1 => {
                return texts.iter().map(|text| self.encode(text)).collect()
            }
            Err(error) => {
                let message = error.to_string();
                return texts
                    .iter()
                    .map(|text| {
                        if text.trim().is_empty() {
                            Err(EmbedError::EmptyInput)
                        } else {
                            Err(EmbedError::Encoder(message.clone()))
                        }
                    })
                    .collect();
            }
        };

        texts
            .iter()
            .map(|text| {
                if text.trim().is_empty() {
                    return Err(EmbedError::EmptyInput);
                }
                encoded
                    .next()
                    .ok_or_else(|| {
                        EmbedError::Encoder("encoder returned too few vectors".to_string())
                    })
                    .and_then(|vector| self.check(vector))
            })
            .collect()
    }
}

/// Async façade over a blocking [`Encoder`].
///
/// Every call runs on tokio's blocking pool. The semaphore caps how many
/// encoder calls are in flight across all clones of the engine, so indexing
/// fan-out and queries share one bounded pool.
#[derive(Clone)]
pub struct EmbeddingEngine {
    encoder: Arc<dyn Encoder + Send + Sync>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for EmbeddingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingEngine")
            .field("model_id", &self.encoder.model_id())
            .field("dimensions", &self.encoder.dimensions())
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

impl EmbeddingEngine {
    pub fn new<E>(encoder: E, max_workers: usize) -> Self
    where
        E: Encoder + Send + Sync + 'static,
    {
        Self::from_shared(Arc::new(encoder), max_workers)
    }

    pub fn from_shared(encoder: Arc<dyn Encoder + Send + Sync>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            encoder,
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.encoder.dimensions()
    }

    pub fn model_id(&self) -> &str {
        self.encoder.model_id()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Embeds a probe text and checks its length; call once after construction
    /// so a misconfigured encoder fails before any indexing starts.
    pub async fn warm_up(&self) -> Result<(), EmbedError> {
        let vector = self.embed(WARM_UP_TEXT).await?;
        info!(
            model_id = self.model_id(),
            dimensions = vector.len(),
            workers = self.max_workers,
            "embedding engine ready"
        );
        Ok(())
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let _permit = self.acquire().await?;
        let encoder = Arc::clone(&self.encoder);
        let text = text.to_string();

        let vector = tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|error| EmbedError::Worker(error.to_string()))??;

        self.check(vector)
    }

    /// One blocking job for the whole batch; each item keeps its own result.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbedError>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let _permit = match self.acquire().await {
            Ok(permit) => permit,
            Err(_) => return texts.iter().map(|_| Err(EmbedError::ShutDown)).collect(),
        };

        let encoder = Arc::clone(&self.encoder);
        let owned = texts.to_vec();
        let joined = tokio::task::spawn_blocking(move || {
            let borrowed: Vec<&str> = owned.iter().map(String::as_str).collect();
            encoder.encode_batch(&borrowed)
        })
        .await;

        match joined {
            Ok(results) if results.len() == texts.len() => results
                .into_iter()
                .map(|result| result.and_then(|vector| self.check(vector)))
                .collect(),
            Ok(results) => {
                let message = format!(
                    "encoder returned {} results for {} texts",
                    results.len(),
                    texts.len()
                );
                texts
                    .iter()
                    .map(|_| Err(EmbedError::Encoder(message.clone())))
                    .collect()
            }
            Err(error) => {
                let message = error.to_string();
                texts
                    .iter()
                    .map(|_| Err(EmbedError::Worker(message.clone())))
                    .collect()
            }
        }
    }

    /// Stops accepting work. In-flight calls finish; later calls fail with
    /// [`EmbedError::ShutDown`].
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.workers.close();
            debug!(model_id = self.model_id(), "embedding engine shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, EmbedError> {
        self.workers
            .acquire()
            .await
            .map_err(|_| EmbedError::ShutDown)
    }

    fn check(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
        let expected = self.encoder.dimensions();
        if vector.len() != expected {
            return Err(EmbedError::Dimension {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.encode("Flight LX 318 from BSL to ZRH").unwrap();
        let second = embedder.encode("Flight LX 318 from BSL to ZRH").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder::new(32);
        assert_eq!(embedder.encode("abc").unwrap().len(), 32);
        assert_eq!(embedder.encode("a").unwrap().len(), 32);
        assert_eq!(
            CharacterNgramEmbedder::default().encode("hotel").unwrap().len(),
            DEFAULT_EMBEDDING_DIMENSIONS
        );
    }

    #[test]
    fn embedder_rejects_blank_text() {
        assert!(matches!(
            CharacterNgramEmbedder::default().encode("  \n"),
            Err(EmbedError::EmptyInput)
        ));
    }

    #[test]
    fn batch_failures_stay_with_their_item() {
        let embedder = CharacterNgramEmbedder::new(16);
        let results = embedder.encode_batch(&["hotel", "", "flight"]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(EmbedError::EmptyInput)));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn engine_matches_encoder() {
        let engine = EmbeddingEngine::new(CharacterNgramEmbedder::new(64), 2);
        let direct = CharacterNgramEmbedder::new(64).encode("Zurich").unwrap();
        assert_eq!(engine.embed("Zurich").await.unwrap(), direct);
        assert_eq!(engine.dimensions(), 64);
        engine.warm_up().await.unwrap();
    }

    #[tokio::test]
    async fn engine_batch_keeps_order() {
        let engine = EmbeddingEngine::new(CharacterNgramEmbedder::new(64), 2);
        let texts = vec!["one".to_string(), " ".to_string(), "three".to_string()];
        let results = engine.embed_batch(&texts).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &engine.embed("one").await.unwrap());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), &engine.embed("three").await.unwrap());
    }

    struct WrongSize;

    impl Encoder for WrongSize {
        fn dimensions(&self) -> usize {
            8
        }

        fn model_id(&self) -> &str {
            "wrong-size"
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![0.0; 4])
        }
    }

    #[tokio::test]
    async fn engine_rejects_wrong_dimensions() {
        let engine = EmbeddingEngine::new(WrongSize, 1);
        assert!(matches!(
            engine.embed("text").await,
            Err(EmbedError::Dimension {
                expected: 8,
                actual: 4
            })
        ));
        assert!(engine.warm_up().await.is_err());
    }

    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Encoder for Counting {
        fn dimensions(&self) -> usize {
            1
        }

        fn model_id(&self) -> &str {
            "counting"
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![1.0])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn engine_bounds_concurrent_encoder_calls() {
        let encoder = Arc::new(Counting {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let engine = EmbeddingEngine::from_shared(encoder.clone(), 2);

        let calls = (0..8).map(|index| {
            let engine = engine.clone();
            async move { engine.embed(&format!("text {index}")).await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(encoder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let engine = EmbeddingEngine::new(CharacterNgramEmbedder::new(8), 1);
        let clone = engine.clone();
        engine.shutdown();
        assert!(clone.is_shut_down());
        assert!(matches!(clone.embed("late").await, Err(EmbedError::ShutDown)));
        let batch = clone.embed_batch(&["late".to_string()]).await;
        assert!(matches!(batch[0], Err(EmbedError::ShutDown)));
    }
}
