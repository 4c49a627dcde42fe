use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vectorizer_core::{
    CancellationToken, CharacterNgramEmbedder, Chunker, ChunkingConfig, CollectionManager,
    EmbeddingEngine, EntityType, HttpDocumentFetcher, HttpEncoder, IndexingOptions,
    IndexingOrchestrator, IndexingReport, QdrantStore, QueryService, SqliteRecordSource,
    DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_WORKERS,
};

const DEFAULT_FAQ_URL: &str =
    "https://storage.googleapis.com/benchmarks-artifacts/travel-db/swiss_faq.md";

#[derive(Parser)]
#[command(name = "vectorizer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY")]
    qdrant_api_key: Option<String>,

    /// SQLite database holding the source tables
    #[arg(long, env = "SQLITE_DB_PATH", default_value = "travel.sqlite")]
    sqlite_db_path: String,

    /// Remote encoder endpoint. The local n-gram encoder is used when unset.
    #[arg(long, env = "ENCODER_URL")]
    encoder_url: Option<String>,

    /// Bearer token for the remote encoder
    #[arg(long, env = "ENCODER_API_KEY")]
    encoder_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Maximum concurrent encoder calls
    #[arg(long, env = "EMBEDDING_WORKERS", default_value_t = DEFAULT_EMBEDDING_WORKERS)]
    embedding_workers: usize,

    /// Chunks embedded and upserted together
    #[arg(long, env = "INDEX_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, env = "CHUNK_MAX_CHARS", default_value_t = 500)]
    chunk_max_chars: usize,

    #[arg(long, env = "CHUNK_OVERLAP_CHARS", default_value_t = 50)]
    chunk_overlap_chars: usize,

    /// Drop search hits scoring below this value
    #[arg(long, env = "SCORE_THRESHOLD")]
    score_threshold: Option<f32>,
}

#[derive(Subcommand)]
enum Command {
    /// Index every row of a source table into its collection.
    Index {
        /// Source table, e.g. flights, hotels, car_rentals, trip_recommendations, faq.
        #[arg(long)]
        table: String,
        /// Target collection. Defaults to the table's own collection.
        #[arg(long)]
        collection: Option<String>,
        /// Append to the existing collection instead of recreating it.
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// Fetch a markdown document and index one point per section.
    IndexDocs {
        #[arg(long, env = "FAQ_URL", default_value = DEFAULT_FAQ_URL)]
        url: String,
        #[arg(long, default_value = "faq_collection")]
        collection: String,
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// Return the stored chunks closest to a query.
    Search {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "2")]
        limit: usize,
        /// Print hits as JSON lines.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the number of points in a collection.
    Count {
        #[arg(long)]
        collection: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "vectorizer boot"
    );

    let mut store = QdrantStore::new(&cli.qdrant_url).context("invalid Qdrant URL")?;
    if let Some(api_key) = &cli.qdrant_api_key {
        store = store.with_api_key(api_key);
    }
    let manager = Arc::new(CollectionManager::new(store));
    let engine = build_engine(&cli);

    let outcome = run(&cli, manager, engine.clone()).await;
    engine.shutdown();
    outcome
}

fn build_engine(cli: &Cli) -> EmbeddingEngine {
    match &cli.encoder_url {
        Some(url) => {
            let mut encoder = HttpEncoder::new(url, cli.embedding_dimensions);
            if let Some(api_key) = &cli.encoder_api_key {
                encoder = encoder.with_api_key(api_key);
            }
            EmbeddingEngine::new(encoder, cli.embedding_workers)
        }
        None => EmbeddingEngine::new(
            CharacterNgramEmbedder::new(cli.embedding_dimensions),
            cli.embedding_workers,
        ),
    }
}

async fn run(
    cli: &Cli,
    manager: Arc<CollectionManager<QdrantStore>>,
    engine: EmbeddingEngine,
) -> anyhow::Result<()> {
    match &cli.command {
        Command::Index {
            table,
            collection,
            append,
        } => {
            let entity = EntityType::from(table.as_str());
            let collection = collection
                .clone()
                .unwrap_or_else(|| entity.collection_name());

            engine.warm_up().await.context("encoder warm-up failed")?;
            let orchestrator = orchestrator(cli, manager, engine)?;
            let source = SqliteRecordSource::connect(&cli.sqlite_db_path)
                .await
                .with_context(|| format!("cannot open {}", cli.sqlite_db_path))?;

            let cancel = cancel_on_ctrl_c();
            let result = orchestrator
                .index(&source, &entity, &collection, !append, &cancel)
                .await;
            source.close().await;
            print_report(&result.with_context(|| format!("indexing {collection} failed"))?)?;
        }
        Command::IndexDocs {
            url,
            collection,
            append,
        } => {
            engine.warm_up().await.context("encoder warm-up failed")?;
            let orchestrator = orchestrator(cli, manager, engine)?;
            let fetcher = HttpDocumentFetcher::new(Duration::from_secs(30))?;

            let cancel = cancel_on_ctrl_c();
            let report = orchestrator
                .index_documents(&fetcher, url, collection, !append, &cancel)
                .await
                .with_context(|| format!("indexing {url} into {collection} failed"))?;
            print_report(&report)?;
        }
        Command::Search {
            collection,
            query,
            limit,
            json,
        } => {
            let mut service = QueryService::new(manager, engine);
            if let Some(threshold) = cli.score_threshold {
                service = service.with_score_threshold(threshold);
            }

            let hits = service.search(collection, query, *limit).await?;
            println!("query: {query}");
            for hit in hits {
                if *json {
                    println!("{}", serde_json::to_string(&hit)?);
                    continue;
                }
                println!("[{collection}] score={:.4} id={}", hit.score, hit.id);
                if let Some(content) = hit.content() {
                    println!("  content:\n{content}");
                }
            }
        }
        Command::Count { collection } => {
            let count = manager.count(collection).await?;
            println!("{collection}: {count} points");
        }
    }
    Ok(())
}

fn orchestrator(
    cli: &Cli,
    manager: Arc<CollectionManager<QdrantStore>>,
    engine: EmbeddingEngine,
) -> anyhow::Result<IndexingOrchestrator<QdrantStore>> {
    let chunker = Chunker::new(ChunkingConfig {
        max_chars: cli.chunk_max_chars,
        overlap_chars: cli.chunk_overlap_chars,
    })?;
    let options = IndexingOptions {
        batch_size: cli.batch_size,
        ..IndexingOptions::default()
    };
    Ok(IndexingOrchestrator::new(manager, engine)
        .with_chunker(chunker)
        .with_options(options)?)
}

/// The current batch still finishes after Ctrl-C; later batches are skipped.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            signal.cancel();
        }
    });
    cancel
}

fn print_report(report: &IndexingReport) -> anyhow::Result<()> {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} points indexed into {} ({} skipped, {} batches) in {}ms",
        report.points_indexed,
        report.collection,
        report.skipped,
        report.batches.len(),
        elapsed.num_milliseconds()
    );
    if report.cancelled {
        println!("run was cancelled before all batches were written");
    }
    info!(report = %serde_json::to_string(report)?, "indexing report");
    Ok(())
}
