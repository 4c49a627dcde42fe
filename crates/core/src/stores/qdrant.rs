use crate::error::StoreError;
use crate::models::{CollectionConfig, Distance, Point, ScoredPoint};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, StoreError> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoint: impl AsRef<str>, timeout: Duration) -> Result<Self, StoreError> {
        let parsed = Url::parse(endpoint.as_ref())?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build()?,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn collection_url(&self, name: &str, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, name, suffix)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(api_key) => request.header("api-key", api_key),
            None => request,
        }
    }
}

/// Maps 404 to [`StoreError::CollectionNotFound`] and any other failure
/// status to [`StoreError::BackendResponse`].
async fn check_status(response: Response, collection: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::CollectionNotFound(collection.to_string()));
    }

    let details = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        status: status.as_u16(),
        details: if details.is_empty() {
            status.to_string()
        } else {
            details
        },
    })
}

fn malformed(details: impl Into<String>) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        status: 200,
        details: details.into(),
    }
}

fn parse_distance(value: &str) -> Option<Distance> {
    match value {
        "Cosine" => Some(Distance::Cosine),
        "Dot" => Some(Distance::Dot),
        "Euclid" => Some(Distance::Euclid),
        _ => None,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .authorized(self.client.get(self.collection_url(name, "/exists")))
            .send()
            .await?;
        let parsed: Value = check_status(response, name).await?.json().await?;

        parsed
            .pointer("/result/exists")
            .and_then(Value::as_bool)
            .ok_or_else(|| malformed("exists response has no result.exists"))
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionConfig>, StoreError> {
        let response = self
            .authorized(self.client.get(self.collection_url(name, "")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: Value = check_status(response, name).await?.json().await?;

        let vectors = parsed
            .pointer("/result/config/params/vectors")
            .ok_or_else(|| malformed("collection info has no vectors config"))?;
        let vector_size = vectors
            .pointer("/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("collection info has no vector size"))?;
        let distance = vectors
            .pointer("/distance")
            .and_then(Value::as_str)
            .and_then(parse_distance)
            .ok_or_else(|| malformed("collection info has an unknown distance"))?;

        Ok(Some(CollectionConfig {
            vector_size: vector_size as usize,
            distance,
        }))
    }

    async fn create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.put(self.collection_url(name, "")))
            .json(&json!({
                "vectors": {
                    "size": config.vector_size,
                    "distance": config.distance,
                }
            }))
            .send()
            .await?;
        check_status(response, name).await?;
        debug!(collection = name, size = config.vector_size, "qdrant collection created");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.delete(self.collection_url(name, "")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, name).await?;
        Ok(())
    }

    async fn upsert_points(&self, name: &str, points: &[Point]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .authorized(
                self.client
                    .put(self.collection_url(name, "/points?wait=true")),
            )
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check_status(response, name).await?;
        Ok(())
    }

    /// Qdrant reports Euclid scores as distances; they are negated so a larger
    /// score always means a closer point.
    async fn search_points(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        with_payload: bool,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let distance = self
            .collection_info(name)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?
            .distance;

        let response = self
            .authorized(self.client.post(self.collection_url(name, "/points/search")))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": with_payload,
            }))
            .send()
            .await?;
        let parsed: Value = check_status(response, name).await?.json().await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = match hit.pointer("/id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => return Err(malformed("search hit has no id")),
            };
            let raw = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let score = match distance {
                Distance::Euclid => -raw,
                Distance::Cosine | Distance::Dot => raw,
            };
            let payload = match hit.pointer("/payload") {
                Some(Value::Object(fields)) if with_payload => Some(fields.clone()),
                _ => None,
            };
            result.push(ScoredPoint { id, score, payload });
        }

        Ok(result)
    }

    async fn count_points(&self, name: &str) -> Result<usize, StoreError> {
        let response = self
            .authorized(self.client.post(self.collection_url(name, "/points/count")))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let parsed: Value = check_status(response, name).await?.json().await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| malformed("count response has no result.count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionManager;
    use serde_json::Map;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_config(server: &MockServer, name: &str, distance: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/collections/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"config": {"params": {"vectors": {"size": 2, "distance": distance}}}}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_collection_with_size_and_distance() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/flights_collection"))
            .and(body_partial_json(json!({
                "vectors": {"size": 384, "distance": "Cosine"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri()).unwrap();
        store
            .create_collection(
                "flights_collection",
                CollectionConfig {
                    vector_size: 384,
                    distance: Distance::Cosine,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reads_collection_info_and_existence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/hotels_collection"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"config": {"params": {"vectors": {"size": 384, "distance": "Cosine"}}}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/collections/hotels_collection/exists"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"exists": true}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/collections/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri()).unwrap();
        assert!(store.collection_exists("hotels_collection").await.unwrap());
        assert_eq!(
            store.collection_info("hotels_collection").await.unwrap(),
            Some(CollectionConfig {
                vector_size: 384,
                distance: Distance::Cosine
            })
        );
        assert_eq!(store.collection_info("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upserts_points_with_wait() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/faq_collection/points"))
            .and(query_param("wait", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let mut payload = Map::new();
        payload.insert("content".to_string(), json!("Baggage rules"));
        let store = QdrantStore::new(server.uri()).unwrap();
        store
            .upsert_points(
                "faq_collection",
                &[Point {
                    id: Uuid::new_v4(),
                    vector: vec![0.1, 0.2],
                    payload,
                }],
            )
            .await
            .unwrap();
        store.upsert_points("faq_collection", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn parses_search_hits() {
        let server = MockServer::start().await;
        mount_config(&server, "flights_collection", "Cosine").await;
        Mock::given(method("POST"))
            .and(path("/collections/flights_collection/points/search"))
            .and(body_partial_json(json!({"limit": 2, "with_payload": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26", "score": 0.91,
                     "payload": {"content": "Flight LX 318", "flight_no": "LX 318"}},
                    {"id": 7, "score": 0.42, "payload": {"content": "Flight QR 51"}}
                ]
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri()).unwrap();
        let hits = store
            .search_points("flights_collection", &[0.0, 1.0], 2, true)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "5c56c793-69f3-4fbf-87e6-c4bf54c28c26");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(
            hits[0].payload.as_ref().and_then(|p| p.get("flight_no")),
            Some(&json!("LX 318"))
        );
        assert_eq!(hits[1].id, "7");
    }

    #[tokio::test]
    async fn euclid_distances_become_descending_scores() {
        let server = MockServer::start().await;
        mount_config(&server, "routes_collection", "Euclid").await;
        Mock::given(method("POST"))
            .and(path("/collections/routes_collection/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": "near", "score": 0.1},
                    {"id": "far", "score": 5.0}
                ]
            })))
            .mount(&server)
            .await;

        let manager = CollectionManager::new(QdrantStore::new(server.uri()).unwrap());
        let hits = manager
            .search("routes_collection", &[0.0, 1.0], 2, false)
            .await
            .unwrap();

        let ids: Vec<_> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(hits[0].score > hits[1].score);
        assert!((hits[0].score + 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn maps_missing_collection_and_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/missing/points/search"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/busy/points"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri()).unwrap();
        let missing = store.search_points("missing", &[1.0], 1, true).await;
        assert!(matches!(missing, Err(StoreError::CollectionNotFound(name)) if name == "missing"));

        let point = Point {
            id: Uuid::new_v4(),
            vector: vec![1.0],
            payload: Map::new(),
        };
        let error = store.upsert_points("busy", &[point]).await.unwrap_err();
        assert!(error.is_transient());
        assert!(matches!(error, StoreError::BackendResponse { status: 503, .. }));
    }

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(matches!(
            QdrantStore::new("not a url"),
            Err(StoreError::Url(_))
        ));
    }
}
