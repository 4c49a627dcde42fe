use crate::error::{FetchError, SourceError};
use crate::models::{EntityType, SourceRecord};
use crate::traits::{DocumentFetcher, RecordSource};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"))
}

pub fn validate_table_name(table: &str) -> Result<(), SourceError> {
    if table_name_pattern().is_match(table) {
        Ok(())
    } else {
        Err(SourceError::InvalidTable(table.to_string()))
    }
}

/// Reads whole tables from a SQLite database, one record per row.
#[derive(Debug, Clone)]
pub struct SqliteRecordSource {
    pool: SqlitePool,
}

impl SqliteRecordSource {
    /// Opens the database read-only; the file must already exist.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordSource for SqliteRecordSource {
    async fn list_records(&self, entity: &EntityType) -> Result<Vec<SourceRecord>, SourceError> {
        let table = entity.table_name();
        validate_table_name(table)?;

        let rows = sqlx::query(&format!("SELECT * FROM \"{table}\""))
            .fetch_all(&self.pool)
            .await?;
        debug!(table, rows = rows.len(), "loaded source rows");

        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &SqliteRow) -> Result<SourceRecord, SourceError> {
    let mut fields = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let (is_null, type_name) = {
            let raw = row.try_get_raw(index)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };

        let value = if is_null {
            Value::Null
        } else {
            match type_name.as_str() {
                "NULL" => Value::Null,
                "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
                "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "NUMERIC" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
                    .map_or(Value::Null, Value::Number),
                "BLOB" => Value::String(
                    String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(index)?)
                        .into_owned(),
                ),
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        fields.insert(column.name().to_string(), value);
    }
    Ok(SourceRecord::new(fields))
}

/// Records held in memory, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordSource {
    tables: HashMap<String, Vec<SourceRecord>>,
}

impl StaticRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, entity: &EntityType, records: Vec<SourceRecord>) -> Self {
        self.tables
            .entry(entity.table_name().to_string())
            .or_default()
            .extend(records);
        self
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn list_records(&self, entity: &EntityType) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(self
            .tables
            .get(entity.table_name())
            .cloned()
            .unwrap_or_default())
    }
}

pub struct HttpDocumentFetcher {
    client: Client,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url)?;
        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let text = response.text().await?;
        debug!(url, bytes = text.len(), "fetched document");
        Ok(text)
    }
}
