//! Persisted vector index.
//!
//! An index is one SQLite file, `{index_dir}/{name}.sqlite`, holding every
//! chunk of a corpus snapshot with its embedding. It is written once and
//! never modified: building over an existing file is a no-op, and a changed
//! corpus needs a new name (or the old file removed).
//!
//! # Schema
//!
//! | Table | Columns |
//! |-------|---------|
//! | `manifest` | `key`, `value`: `schema_version`, `model`, `dims`, `chunk_count`, `document_count`, `created_at` |
//! | `documents` | `id` (content-addressed), `filename`, `metadata_json` |
//! | `chunks` | `id`, `document_id`, `chunk_index`, `text`, `hash`, `embedding` (little-endian `f32` BLOB) |
//!
//! # Build protocol
//!
//! 1. If the final file exists, stop ([`BuildOutcome::Skipped`]); nothing is
//!    embedded or written.
//! 2. Take `{name}.sqlite.lock` with `create_new`; a second concurrent
//!    builder fails instead of interleaving.
//! 3. Write everything to `{name}.sqlite.partial`, then rename it into place.
//!    Readers therefore only ever open a complete index.
//!
//! # Loading
//!
//! [`VectorIndex::load`] reads the whole index into memory. Persisted files
//! are untrusted by default: under [`IndexTrust::Verify`] the loader checks
//! the schema version, the embedding model, every vector's dimensions, every
//! chunk's content hash and every document's content-addressed id, and
//! refuses the index on the first mismatch. [`IndexTrust::Trust`] skips
//! those checks and is an explicit opt-in (`index.trust_on_load`).

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::hashing::sha256_hex;
use crate::models::{Chunk, DocumentMetadata};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Bumped whenever the table layout changes.
pub const SCHEMA_VERSION: i64 = 1;

/// Chunks sent to the embedder per call during a build.
const EMBED_BATCH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index '{name}' does not exist at {path}; run `pharness index` first")]
    Missing { name: String, path: String },

    #[error("index schema version {found} is not supported (expected {expected})")]
    Schema { found: i64, expected: i64 },

    #[error("index was built with model '{index}' but the embedder uses '{embedder}'")]
    ModelMismatch { index: String, embedder: String },

    #[error("index at {path} failed verification: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("index database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Whether a persisted index is verified before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTrust {
    Verify,
    Trust,
}

impl IndexTrust {
    pub fn from_config(trust_on_load: bool) -> Self {
        if trust_on_load {
            IndexTrust::Trust
        } else {
            IndexTrust::Verify
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built { chunks: usize, documents: usize },
    Skipped,
}

/// Location of the index called `name` under `index_dir`.
pub fn index_path(index_dir: &Path, name: &str) -> PathBuf {
    index_dir.join(format!("{}.sqlite", name))
}

/// Index names become file names: letters, digits, `-`, `_` and `.` only.
pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        bail!(
            "invalid index name '{}': use letters, digits, '-', '_' or '.'",
            name
        );
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Removes the build lock on every exit path.
struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(index: &Path) -> Result<Self> {
        let path = sibling(index, ".lock");
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "another build of {} is in progress (remove {} if it is stale)",
                    index.display(),
                    path.display()
                )
            })?;
        Ok(Self { path })
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create)
        .journal_mode(SqliteJournalMode::Delete);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Build the index at `path` from `chunks`, unless it already exists.
pub async fn build_index(
    path: &Path,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    progress: &dyn ProgressReporter,
) -> Result<BuildOutcome> {
    if path.exists() {
        info!(path = %path.display(), "index already exists, skipping build");
        return Ok(BuildOutcome::Skipped);
    }
    if chunks.is_empty() {
        bail!("nothing to index: no chunks were produced");
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let lock = BuildLock::acquire(path)?;
    build_locked(path, &lock, chunks, embedder, progress).await
}

/// The build proper, run while `_lock` is held. Another builder may have
/// moved its index into place between the caller's check and the lock.
async fn build_locked(
    path: &Path,
    _lock: &BuildLock,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    progress: &dyn ProgressReporter,
) -> Result<BuildOutcome> {
    if path.exists() {
        info!(path = %path.display(), "index appeared while waiting for the lock, skipping build");
        return Ok(BuildOutcome::Skipped);
    }
    let partial = sibling(path, ".partial");
    if partial.exists() {
        std::fs::remove_file(&partial)?;
    }

    let pool = open_pool(&partial, true).await?;
    let outcome = populate(&pool, chunks, embedder, progress).await;
    pool.close().await;
    if outcome.is_err() {
        let _ = std::fs::remove_file(&partial);
        let _ = std::fs::remove_file(sibling(&partial, "-journal"));
    }
    let outcome = outcome?;

    std::fs::rename(&partial, path)
        .with_context(|| format!("failed to move {} into place", partial.display()))?;
    info!(path = %path.display(), ?outcome, "index built");
    Ok(outcome)
}

async fn populate(
    pool: &SqlitePool,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    progress: &dyn ProgressReporter,
) -> Result<BuildOutcome> {
    create_schema(pool).await?;

    let mut documents: HashMap<&str, &DocumentMetadata> = HashMap::new();
    for chunk in chunks {
        documents
            .entry(chunk.source_document_id.as_str())
            .or_insert(&*chunk.metadata);
    }

    let mut tx = pool.begin().await?;
    for (id, metadata) in &documents {
        sqlx::query("INSERT INTO documents (id, filename, metadata_json) VALUES (?, ?, ?)")
            .bind(*id)
            .bind(metadata.filename())
            .bind(serde_json::to_string(metadata)?)
            .execute(&mut *tx)
            .await?;
    }

    let total = chunks.len() as u64;
    let mut dims: Option<usize> = None;
    let mut done = 0u64;
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_many(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }

        for (chunk, vector) in batch.iter().zip(&vectors) {
            let width = *dims.get_or_insert(vector.len());
            if vector.is_empty() || vector.len() != width {
                bail!(
                    "embedding for chunk {} has {} dimensions, expected {}",
                    chunk.id,
                    vector.len(),
                    width
                );
            }
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.source_document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        done += batch.len() as u64;
        progress.report(ProgressEvent::Embedding { n: done, total });
    }

    let manifest = [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("model", embedder.model_name().to_string()),
        ("dims", dims.unwrap_or(0).to_string()),
        ("chunk_count", chunks.len().to_string()),
        ("document_count", documents.len().to_string()),
        ("created_at", chrono::Utc::now().to_rfc3339()),
    ];
    for (key, value) in manifest {
        sqlx::query("INSERT INTO manifest (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(BuildOutcome::Built {
        chunks: chunks.len(),
        documents: documents.len(),
    })
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE manifest (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            metadata_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn read_manifest(pool: &SqlitePool) -> Result<HashMap<String, String>, sqlx::Error> {
    let rows = sqlx::query("SELECT key, value FROM manifest")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
        .collect())
}

struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// An index loaded into memory, read-only.
pub struct VectorIndex {
    name: String,
    model: String,
    dims: usize,
    document_count: usize,
    entries: Vec<IndexEntry>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("dims", &self.dims)
            .field("chunks", &self.entries.len())
            .finish()
    }
}

impl VectorIndex {
    /// Load the index at `path`.
    ///
    /// `embedder_model` is the model that will embed queries; under
    /// [`IndexTrust::Verify`] it must equal the model recorded at build time.
    pub async fn load(
        path: &Path,
        trust: IndexTrust,
        embedder_model: &str,
    ) -> Result<Self, IndexError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !path.is_file() {
            return Err(IndexError::Missing {
                name,
                path: path.display().to_string(),
            });
        }
        let corrupt = |reason: String| IndexError::Corrupt {
            path: path.display().to_string(),
            reason,
        };

        let pool = open_pool(path, false).await?;
        let manifest = read_manifest(&pool).await?;
        let field = |key: &str| {
            manifest
                .get(key)
                .cloned()
                .ok_or_else(|| corrupt(format!("manifest has no '{}'", key)))
        };

        let model = field("model")?;
        let dims: usize = field("dims")?
            .parse()
            .map_err(|_| corrupt("manifest 'dims' is not a number".to_string()))?;

        if trust == IndexTrust::Verify {
            let found: i64 = field("schema_version")?
                .parse()
                .map_err(|_| corrupt("manifest 'schema_version' is not a number".to_string()))?;
            if found != SCHEMA_VERSION {
                return Err(IndexError::Schema {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
            if model != embedder_model {
                return Err(IndexError::ModelMismatch {
                    index: model,
                    embedder: embedder_model.to_string(),
                });
            }
        }

        let mut documents: HashMap<String, Arc<DocumentMetadata>> = HashMap::new();
        for row in sqlx::query("SELECT id, metadata_json FROM documents")
            .fetch_all(&pool)
            .await?
        {
            let id: String = row.get("id");
            let json: String = row.get("metadata_json");
            let metadata: DocumentMetadata = serde_json::from_str(&json)
                .map_err(|e| corrupt(format!("document {} has unreadable metadata: {}", id, e)))?;
            if trust == IndexTrust::Verify && (metadata.unique_id() != id || !metadata.verify_id()) {
                return Err(corrupt(format!("document {} does not match its metadata", id)));
            }
            documents.insert(id, Arc::new(metadata));
        }

        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, text, hash, embedding FROM chunks ORDER BY document_id, chunk_index",
        )
        .fetch_all(&pool)
        .await?;
        pool.close().await;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let document_id: String = row.get("document_id");
            let text: String = row.get("text");
            let hash: String = row.get("hash");
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);

            let metadata = documents
                .get(&document_id)
                .cloned()
                .ok_or_else(|| corrupt(format!("chunk {} references unknown document", id)))?;
            if trust == IndexTrust::Verify {
                if sha256_hex(text.as_bytes()) != hash {
                    return Err(corrupt(format!("chunk {} text does not match its hash", id)));
                }
                if vector.len() != dims || blob.len() != dims * 4 {
                    return Err(corrupt(format!(
                        "chunk {} has {} dimensions, manifest says {}",
                        id,
                        vector.len(),
                        dims
                    )));
                }
            }

            entries.push(IndexEntry {
                chunk: Chunk {
                    id,
                    source_document_id: document_id,
                    chunk_index: row.get("chunk_index"),
                    text,
                    hash,
                    metadata,
                },
                vector,
            });
        }

        debug!(name = %name, chunks = entries.len(), ?trust, "index loaded");
        Ok(Self {
            name,
            model,
            dims,
            document_count: documents.len(),
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    /// Exact nearest-neighbour search by cosine similarity.
    ///
    /// Returns at most `k` chunks, best first, each with its raw score. Ties
    /// keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>> {
        if query.len() != self.dims {
            bail!(
                "query embedding has {} dimensions, index '{}' has {}",
                query.len(),
                self.name,
                self.dims
            );
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| (self.entries[i].chunk.clone(), score))
            .collect())
    }
}

/// Catalog row for one persisted index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub name: String,
    pub model: String,
    pub chunk_count: u64,
    pub document_count: u64,
    pub created_at: Option<String>,
}

/// Describe every `*.sqlite` index in `index_dir`, sorted by name. A missing
/// directory yields an empty list; an unreadable file is an error.
pub async fn list_indexes(index_dir: &Path) -> Result<Vec<IndexSummary>> {
    if !index_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(index_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "sqlite"))
        .collect();
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let pool = open_pool(&path, false)
            .await
            .with_context(|| format!("failed to open index {}", path.display()))?;
        let manifest = read_manifest(&pool).await?;
        pool.close().await;
        let count = |key: &str| {
            manifest
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        out.push(IndexSummary {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            model: manifest.get("model").cloned().unwrap_or_default(),
            chunk_count: count("chunk_count"),
            document_count: count("document_count"),
            created_at: manifest.get("created_at").cloned(),
        });
    }
    Ok(out)
}
