//! Per-session persisted vector index.
//!
//! Each session owns one SQLite database at `<session>/index/index.db`
//! holding the session's chunks and their embedding vectors (little-endian
//! f32 BLOBs). An `index_meta` table records the schema version, embedding
//! model, and dimensionality, so [`VectorIndex::open`] can detect a missing,
//! corrupt, or incompatible index and fail cleanly instead of returning
//! garbage similarities.
//!
//! Build atomicity: `Replace` mode writes a complete database at a
//! temporary path and renames it over the live file only after commit, so a
//! failed rebuild leaves the previous index queryable. `Append` mode
//! inserts into the existing database inside a single transaction.

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::EmbeddingConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{Chunk, ScoredChunk};

const SCHEMA_VERSION: i64 = 1;
const INDEX_FILE: &str = "index.db";

/// Whether re-ingestion into an existing session rebuilds the index from
/// scratch or extends it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    #[default]
    Replace,
    Append,
}

impl FromStr for IngestMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(IngestMode::Replace),
            "append" => Ok(IngestMode::Append),
            other => bail!("Unknown ingest mode: '{}'. Use replace or append.", other),
        }
    }
}

/// Index lifecycle error. `NotFound` tells the caller to ingest first;
/// `Corrupt` and `Incompatible` tell the caller to re-ingest.
#[derive(Debug)]
pub enum IndexError {
    NotFound(PathBuf),
    Corrupt { path: PathBuf, cause: String },
    Incompatible { path: PathBuf, cause: String },
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::NotFound(path) => {
                write!(f, "index not found at {}", path.display())
            }
            IndexError::Corrupt { path, cause } => {
                write!(f, "index at {} is corrupt: {}", path.display(), cause)
            }
            IndexError::Incompatible { path, cause } => {
                write!(f, "index at {} is incompatible: {}", path.display(), cause)
            }
        }
    }
}

impl std::error::Error for IndexError {}

/// Query handle over one session's persisted index.
#[derive(Debug)]
pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
    model: String,
    dims: usize,
}

impl VectorIndex {
    /// Embed `chunks` and persist them as this session's index.
    ///
    /// `Replace` builds a fresh database beside the live one and renames it
    /// into place after commit. `Append` requires an existing index whose
    /// embedding model and dims match the provider. Either way, no partial
    /// index is ever left queryable: embedding happens before any write,
    /// and all writes commit in one transaction.
    pub async fn build(
        index_dir: &Path,
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
        config: &EmbeddingConfig,
        mode: IngestMode,
    ) -> Result<Self> {
        if chunks.is_empty() {
            bail!("cannot build an index from zero chunks");
        }

        // Embed everything up front so a provider failure cannot leave a
        // half-written database behind.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(config.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = embedding::embed_texts(provider, config, &texts).await?;
            vectors.extend(batch_vectors);
        }

        match mode {
            IngestMode::Replace => Self::build_replace(index_dir, chunks, &vectors, provider).await,
            IngestMode::Append => Self::build_append(index_dir, chunks, &vectors, provider).await,
        }
    }

    async fn build_replace(
        index_dir: &Path,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        provider: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let live_path = index_dir.join(INDEX_FILE);
        let tmp_path = index_dir.join(format!(
            "{}.tmp-{}",
            INDEX_FILE,
            &Uuid::new_v4().simple().to_string()[..8]
        ));

        let result = async {
            let pool = connect(&tmp_path, true).await?;
            create_schema(&pool).await?;

            let mut tx = pool.begin().await?;
            sqlx::query(
                "INSERT INTO index_meta (schema_version, embedding_model, dims, created_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(SCHEMA_VERSION)
            .bind(provider.model_name())
            .bind(provider.dims() as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            insert_chunks(&mut tx, chunks, vectors).await?;
            tx.commit().await?;
            pool.close().await;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        // The old index stays live until this rename.
        std::fs::rename(&tmp_path, &live_path)?;

        Self::open(index_dir).await.map_err(Into::into)
    }

    async fn build_append(
        index_dir: &Path,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        provider: &dyn EmbeddingProvider,
    ) -> Result<Self> {
        let index = Self::open(index_dir).await?;
        index.ensure_matches(provider)?;

        let mut tx = index.pool.begin().await?;
        insert_chunks(&mut tx, chunks, vectors).await?;
        tx.commit().await?;

        Ok(index)
    }

    /// Reload a previously persisted index.
    pub async fn open(index_dir: &Path) -> Result<Self, IndexError> {
        let path = index_dir.join(INDEX_FILE);
        if !path.is_file() {
            return Err(IndexError::NotFound(path));
        }

        let corrupt = |cause: String| IndexError::Corrupt {
            path: path.clone(),
            cause,
        };

        let pool = connect(&path, false)
            .await
            .map_err(|e| corrupt(e.to_string()))?;

        let meta = sqlx::query(
            "SELECT schema_version, embedding_model, dims FROM index_meta LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .map_err(|e| corrupt(e.to_string()))?
        .ok_or_else(|| corrupt("index_meta is empty".to_string()))?;

        let schema_version: i64 = meta.get("schema_version");
        if schema_version != SCHEMA_VERSION {
            return Err(IndexError::Incompatible {
                path,
                cause: format!(
                    "schema version {} (expected {})",
                    schema_version, SCHEMA_VERSION
                ),
            });
        }

        let model: String = meta.get("embedding_model");
        let dims: i64 = meta.get("dims");

        Ok(Self {
            pool,
            path,
            model,
            dims: dims as usize,
        })
    }

    /// Fail with `Incompatible` when the stored vectors were produced by a
    /// different embedding model or dimensionality than `provider`.
    pub fn ensure_matches(&self, provider: &dyn EmbeddingProvider) -> Result<(), IndexError> {
        if self.model != provider.model_name() || self.dims != provider.dims() {
            return Err(IndexError::Incompatible {
                path: self.path.clone(),
                cause: format!(
                    "index built with model '{}' ({} dims), configured provider is '{}' ({} dims)",
                    self.model,
                    self.dims,
                    provider.model_name(),
                    provider.dims()
                ),
            });
        }
        Ok(())
    }

    /// Embed `text` and return the `k` most similar chunks, ordered by
    /// descending cosine score. `k` past the index size returns everything;
    /// `k == 0` is a parameter error.
    pub async fn query(
        &self,
        provider: &dyn EmbeddingProvider,
        config: &EmbeddingConfig,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            bail!("k must be >= 1");
        }
        self.ensure_matches(provider)?;

        let query_vec = embedding::embed_query(provider, config, text).await?;

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source, c.page, c.chunk_index, c.text, c.hash, v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let score = embedding::cosine_similarity(&query_vec, &vec);
                ScoredChunk {
                    chunk: Chunk {
                        id: row.get("id"),
                        source: row.get("source"),
                        page: row.get("page"),
                        chunk_index: row.get("chunk_index"),
                        text: row.get("text"),
                        hash: row.get("hash"),
                    },
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// The index must stay a single file so the replace rename is atomic, so
/// journaling is kept in rollback mode rather than the usual WAL.
async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            schema_version INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            page INTEGER,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn insert_chunks(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, source, page, chunk_index, text, hash) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.page)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(embedding::vec_to_blob(vector))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
