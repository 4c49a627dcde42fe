use crate::cancel::CancellationToken;
use crate::chunking::{split_sections, Chunker};
use crate::collection::CollectionManager;
use crate::embeddings::EmbeddingEngine;
use crate::error::{EmbedError, FetchError, IndexError, StoreError};
use crate::formatter::ContentFormatter;
use crate::models::{Chunk, Distance, EntityType, IndexingReport, Point, SourceRecord};
use crate::retry::RetryPolicy;
use crate::traits::{DocumentFetcher, RecordSource, VectorStore};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SECTION_DELIMITER: &str = "\n##";

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub batch_size: usize,
    pub distance: Distance,
    pub upsert_retry: RetryPolicy,
    pub fetch_retry: RetryPolicy,
    pub section_delimiter: String,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            distance: Distance::Cosine,
            upsert_retry: RetryPolicy::default(),
            fetch_retry: RetryPolicy::default(),
            section_delimiter: DEFAULT_SECTION_DELIMITER.to_string(),
        }
    }
}

/// The only writer to the vector store.
///
/// Every run holds the collection's write guard from the (optional) recreate
/// until its last upsert. Batches run one after another; chunks inside a
/// batch are embedded concurrently and the batch is upserted once all of them
/// have settled.
pub struct IndexingOrchestrator<S> {
    manager: Arc<CollectionManager<S>>,
    engine: EmbeddingEngine,
    formatter: ContentFormatter,
    chunker: Chunker,
    options: IndexingOptions,
}

impl<S> IndexingOrchestrator<S>
where
    S: VectorStore + Send + Sync,
{
    pub fn new(manager: Arc<CollectionManager<S>>, engine: EmbeddingEngine) -> Self {
        Self {
            manager,
            engine,
            formatter: ContentFormatter::default(),
            chunker: Chunker::default(),
            options: IndexingOptions::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: ContentFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_options(mut self, options: IndexingOptions) -> Result<Self, IndexError> {
        if options.batch_size == 0 {
            return Err(IndexError::InvalidArgument(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        self.options = options;
        Ok(self)
    }

    pub fn manager(&self) -> &Arc<CollectionManager<S>> {
        &self.manager
    }

    pub fn engine(&self) -> &EmbeddingEngine {
        &self.engine
    }

    /// Loads every record of `entity` from `source` and indexes it into
    /// `collection`. With `recreate` the collection is emptied first;
    /// otherwise it must exist and points are appended.
    ///
    /// Records are loaded before the collection is touched, so a failing
    /// source leaves the existing collection as it was.
    pub async fn index<R>(
        &self,
        source: &R,
        entity: &EntityType,
        collection: &str,
        recreate: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexingReport, IndexError>
    where
        R: RecordSource + Sync + ?Sized,
    {
        let _guard = self.manager.lock(collection).await;
        let records = source.list_records(entity).await?;
        self.prepare(collection, recreate).await?;

        if records.is_empty() {
            warn!(collection, table = entity.table_name(), "no records found");
            return Ok(IndexingReport::start(collection).finish());
        }
        info!(
            collection,
            table = entity.table_name(),
            records = records.len(),
            "loaded records"
        );

        self.run_records(entity, &records, collection, cancel).await
    }

    /// Indexes records the caller already holds into an existing collection.
    pub async fn index_records(
        &self,
        entity: &EntityType,
        records: &[SourceRecord],
        collection: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexingReport, IndexError> {
        let _guard = self.manager.lock(collection).await;
        self.prepare(collection, false).await?;
        self.run_records(entity, records, collection, cancel).await
    }

    /// Fetches a markdown-style document, splits it into sections on the
    /// configured delimiter and indexes one point per section.
    ///
    /// The fetch happens before the collection is touched, so a failed fetch
    /// leaves the existing collection as it was.
    pub async fn index_documents<F>(
        &self,
        fetcher: &F,
        url: &str,
        collection: &str,
        recreate: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexingReport, IndexError>
    where
        F: DocumentFetcher + Sync + ?Sized,
    {
        let _guard = self.manager.lock(collection).await;

        let text = self
            .options
            .fetch_retry
            .run("fetch document", FetchError::is_transient, move || {
                fetcher.fetch_text(url)
            })
            .await?;

        self.prepare(collection, recreate).await?;

        let mut report = IndexingReport::start(collection);
        let sections = split_sections(&text, &self.options.section_delimiter);
        if sections.is_empty() {
            warn!(collection, url, "document has no sections to index");
            return Ok(report.finish());
        }

        let tasks = sections.iter().map(|section| async move {
            let vector = self.engine.embed(section).await?;
            let chunk = Chunk {
                text: section.to_string(),
                metadata: [("type".to_string(), Value::from("faq"))]
                    .into_iter()
                    .collect(),
            };
            Ok::<_, EmbedError>(Point::from_chunk(chunk, vector))
        });

        let mut points = Vec::with_capacity(sections.len());
        for (index, result) in join_all(tasks).await.into_iter().enumerate() {
            match result {
                Ok(point) => points.push(point),
                Err(error) => {
                    report.skipped += 1;
                    warn!(
                        collection,
                        section = index,
                        %error,
                        "skipping section that failed to embed"
                    );
                }
            }
        }

        let total_batches = points.len().div_ceil(self.options.batch_size);
        for batch in points.chunks(self.options.batch_size) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(collection, committed = report.points_indexed, "indexing cancelled");
                break;
            }
            self.commit(collection, batch, report.points_indexed).await?;
            let batch_report = report.record_batch(batch.len(), 0);
            info!(
                collection,
                batch = batch_report.batch,
                total_batches,
                indexed = batch_report.indexed,
                total = report.points_indexed,
                "indexed document batch"
            );
        }

        if report.points_indexed == 0 {
            warn!(collection, "no document sections were embedded and indexed");
        } else {
            info!(
                collection,
                indexed = report.points_indexed,
                skipped = report.skipped,
                "finished indexing documents"
            );
        }
        Ok(report.finish())
    }

    async fn prepare(&self, collection: &str, recreate: bool) -> Result<(), IndexError> {
        let dimensions = self.engine.dimensions();
        if recreate {
            self.manager
                .create_or_recreate(collection, dimensions, self.options.distance)
                .await?;
            return Ok(());
        }

        let config = self.manager.config(collection).await?;
        if config.vector_size != dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: config.vector_size,
                actual: dimensions,
            }
            .into());
        }
        if config.distance != self.options.distance {
            return Err(StoreError::DistanceMismatch {
                expected: config.distance,
                actual: self.options.distance,
            }
            .into());
        }
        Ok(())
    }

    async fn run_records(
        &self,
        entity: &EntityType,
        records: &[SourceRecord],
        collection: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexingReport, IndexError> {
        let mut report = IndexingReport::start(collection);

        let chunks: Vec<Chunk> = records
            .iter()
            .flat_map(|record| {
                let text = self.formatter.format(entity, record);
                self.chunker.chunk_record(&text, record).collect::<Vec<_>>()
            })
            .collect();

        if chunks.is_empty() {
            warn!(collection, "no valid chunks generated");
            return Ok(report.finish());
        }

        let total_batches = chunks.len().div_ceil(self.options.batch_size);
        for batch in chunks.chunks(self.options.batch_size) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(collection, committed = report.points_indexed, "indexing cancelled");
                break;
            }

            let (points, skipped) = self.embed_batch(collection, batch).await;
            self.commit(collection, &points, report.points_indexed).await?;

            let batch_report = report.record_batch(points.len(), skipped);
            info!(
                collection,
                batch = batch_report.batch,
                total_batches,
                indexed = batch_report.indexed,
                skipped = batch_report.skipped,
                total = report.points_indexed,
                "indexed batch"
            );
        }

        info!(
            collection,
            indexed = report.points_indexed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "finished indexing"
        );
        Ok(report.finish())
    }

    /// Embeds every chunk of the batch concurrently. Results come back in
    /// chunk order, so each vector stays paired with its own text.
    async fn embed_batch(&self, collection: &str, batch: &[Chunk]) -> (Vec<Point>, usize) {
        let tasks = batch.iter().map(|chunk| async move {
            self.engine
                .embed(&chunk.text)
                .await
                .map(|vector| Point::from_chunk(chunk.clone(), vector))
        });

        let mut points = Vec::with_capacity(batch.len());
        let mut skipped = 0;
        for (index, result) in join_all(tasks).await.into_iter().enumerate() {
            match result {
                Ok(point) => points.push(point),
                Err(error) => {
                    skipped += 1;
                    warn!(collection, chunk = index, %error, "skipping chunk that failed to embed");
                }
            }
        }
        (points, skipped)
    }

    async fn commit(
        &self,
        collection: &str,
        points: &[Point],
        committed: usize,
    ) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }
        self.options
            .upsert_retry
            .run("upsert", StoreError::is_transient, move || {
                self.manager.upsert(collection, points)
            })
            .await
            .map_err(|source| IndexError::Upsert { committed, source })
    }
}
