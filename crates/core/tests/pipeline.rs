use serde_json::{json, Value};
use std::sync::Arc;
use vectorizer_core::{
    CancellationToken, CharacterNgramEmbedder, Chunker, ChunkingConfig, CollectionManager,
    ContentFormatter, EmbeddingEngine, EntityType, IndexingOrchestrator, MemoryStore,
    QueryService, SourceRecord, StaticRecordSource,
};

const DIMS: usize = 384;

fn flight(flight_no: &str, from: &str, to: &str) -> SourceRecord {
    [
        ("flight_no", json!(flight_no)),
        ("departure_airport", json!(from)),
        ("arrival_airport", json!(to)),
        ("scheduled_departure", json!("2024-04-30 13:00:00")),
        ("scheduled_arrival", json!("2024-04-30 14:05:00")),
        ("actual_departure", Value::Null),
        ("actual_arrival", Value::Null),
        ("status", json!("Scheduled")),
        ("aircraft_code", json!("223")),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

fn flights() -> Vec<SourceRecord> {
    vec![
        flight("LX0112", "Basel", "Zurich"),
        flight("TG0971", "Geneva", "Bangkok"),
        flight("KL1956", "Lugano", "Amsterdam"),
        flight("LH1284", "Bern", "Frankfurt"),
    ]
}

struct Pipeline {
    manager: Arc<CollectionManager<MemoryStore>>,
    engine: EmbeddingEngine,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            manager: Arc::new(CollectionManager::new(MemoryStore::new())),
            engine: EmbeddingEngine::new(CharacterNgramEmbedder::new(DIMS), 4),
        }
    }

    fn orchestrator(&self, chunker: Chunker) -> IndexingOrchestrator<MemoryStore> {
        IndexingOrchestrator::new(Arc::clone(&self.manager), self.engine.clone())
            .with_chunker(chunker)
    }

    fn queries(&self) -> QueryService<MemoryStore> {
        QueryService::new(Arc::clone(&self.manager), self.engine.clone())
    }
}

#[test]
fn formatted_records_are_chunked_within_bounds() {
    let formatter = ContentFormatter::default();
    let chunker = Chunker::new(ChunkingConfig {
        max_chars: 80,
        overlap_chars: 10,
    })
    .unwrap();

    for record in flights() {
        let text = formatter.format(&EntityType::Flight, &record);
        assert!(text.contains("actual departure was at None"));

        let chunks: Vec<_> = chunker.chunk_record(&text, &record).collect();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 80);
            assert!(text.contains(chunk.text.as_str()));
            assert_eq!(chunk.metadata, record);
        }
        for word in text.split_whitespace() {
            assert!(
                chunks.iter().any(|chunk| chunk.text.contains(word)),
                "word {word:?} was lost"
            );
        }
    }
}

#[tokio::test]
async fn every_chunk_becomes_a_point_with_record_metadata() {
    let pipeline = Pipeline::new();
    let chunker = Chunker::new(ChunkingConfig {
        max_chars: 120,
        overlap_chars: 20,
    })
    .unwrap();
    let formatter = ContentFormatter::default();
    let expected: usize = flights()
        .iter()
        .map(|record| {
            chunker
                .chunks(&formatter.format(&EntityType::Flight, record))
                .count()
        })
        .sum();

    let source = StaticRecordSource::new().with_records(&EntityType::Flight, flights());
    let report = pipeline
        .orchestrator(chunker)
        .index(
            &source,
            &EntityType::Flight,
            "flights_collection",
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.points_indexed, expected);
    assert_eq!(report.skipped, 0);
    assert!(!report.cancelled);
    assert_eq!(
        pipeline.manager.count("flights_collection").await.unwrap(),
        expected
    );

    let hits = pipeline
        .queries()
        .search("flights_collection", "LX0112 Basel", expected)
        .await
        .unwrap();
    assert_eq!(hits.len(), expected);
    for hit in &hits {
        let payload = hit.payload.as_ref().unwrap();
        assert!(payload.contains_key("flight_no"));
        assert!(payload.contains_key("aircraft_code"));
        assert!(hit.content().is_some_and(|content| !content.is_empty()));
    }
}

#[tokio::test]
async fn search_finds_the_matching_flight_first() {
    let pipeline = Pipeline::new();
    let source = StaticRecordSource::new().with_records(&EntityType::Flight, flights());
    pipeline
        .orchestrator(Chunker::default())
        .index(
            &source,
            &EntityType::Flight,
            "flights_collection",
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let hits = pipeline
        .queries()
        .search("flights_collection", "flight to Zurich", 3)
        .await
        .unwrap();

    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    let top = hits[0].payload.as_ref().unwrap();
    assert_eq!(top["arrival_airport"], json!("Zurich"));
    assert_eq!(top["flight_no"], json!("LX0112"));
}

#[tokio::test]
async fn reindexing_without_recreate_keeps_duplicates() {
    let pipeline = Pipeline::new();
    let source = StaticRecordSource::new().with_records(&EntityType::Flight, flights());
    let orchestrator = pipeline.orchestrator(Chunker::default());
    let cancel = CancellationToken::new();

    let first = orchestrator
        .index(&source, &EntityType::Flight, "flights_collection", true, &cancel)
        .await
        .unwrap();
    orchestrator
        .index(&source, &EntityType::Flight, "flights_collection", false, &cancel)
        .await
        .unwrap();

    assert_eq!(
        pipeline.manager.count("flights_collection").await.unwrap(),
        first.points_indexed * 2
    );

    // Recreating empties the collection before indexing again.
    orchestrator
        .index(&source, &EntityType::Flight, "flights_collection", true, &cancel)
        .await
        .unwrap();
    assert_eq!(
        pipeline.manager.count("flights_collection").await.unwrap(),
        first.points_indexed
    );
}

#[tokio::test]
async fn empty_collection_search_is_empty() {
    let pipeline = Pipeline::new();
    pipeline
        .orchestrator(Chunker::default())
        .index(
            &StaticRecordSource::new(),
            &EntityType::Hotel,
            "hotels_collection",
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let hits = pipeline
        .queries()
        .search("hotels_collection", "hotel in Basel", 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
}
