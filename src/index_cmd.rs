//! `pharness index` and `pharness indexes`.
//!
//! Builds the named index from the PDFs in the input folder: each document's
//! page text is normalized and chunked, every chunk is embedded, and the
//! result is persisted. An existing index is never rebuilt.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::chunk::{chunk_document, normalize_text, ChunkPolicy};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::extract_pages;
use crate::index::{build_index, index_path, list_indexes, validate_index_name, BuildOutcome};
use crate::ingest::discover_pdfs;
use crate::metadata::extract_metadata;
use crate::models::{Chunk, ExtractedMetadata};
use crate::progress::ProgressReporter;

/// Chunk every readable PDF in `pdfs`. Unreadable documents are skipped.
pub fn collect_chunks(pdfs: &[PathBuf], policy: &ChunkPolicy) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for pdf in pdfs {
        let metadata = match extract_metadata(pdf) {
            ExtractedMetadata::Complete(meta) => Arc::new(meta),
            ExtractedMetadata::Failed { filename, .. } => {
                warn!(filename = %filename, "skipping document without metadata");
                continue;
            }
        };
        let pages = match extract_pages(pdf) {
            Ok(pages) => pages,
            Err(e) => {
                warn!(filename = metadata.filename(), error = %e, "skipping unreadable document");
                continue;
            }
        };
        let text = normalize_text(&pages.join("\n"));
        chunks.extend(chunk_document(&metadata, &text, policy));
    }
    chunks
}

pub async fn run_index(
    config: &Config,
    name: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let name = name.unwrap_or(&config.retrieval.index_name);
    validate_index_name(name)?;
    let path = index_path(&config.paths.index_dir, name);

    if path.exists() {
        println!("Index already exists at {}", path.display());
        return Ok(());
    }

    let input = &config.paths.input_dir;
    let pdfs = discover_pdfs(input)?;
    if pdfs.is_empty() {
        println!("No PDF files found in folder: {}", input.display());
        return Ok(());
    }

    let policy = ChunkPolicy::new(config.chunking.size, config.chunking.overlap)?;
    let chunks = collect_chunks(&pdfs, &policy);
    let embedder = create_embedder(&config.embedding)?;

    match build_index(&path, &chunks, embedder.as_ref(), progress).await? {
        BuildOutcome::Built { chunks, documents } => {
            println!("index {}", name);
            println!("  documents: {}", documents);
            println!("  chunks: {}", chunks);
            println!("  model: {}", embedder.model_name());
            println!("  saved to: {}", path.display());
        }
        BuildOutcome::Skipped => {
            println!("Index already exists at {}", path.display());
        }
    }
    Ok(())
}

pub async fn run_list_indexes(config: &Config) -> Result<()> {
    let indexes = list_indexes(&config.paths.index_dir).await?;
    if indexes.is_empty() {
        println!("No indexes in {}", config.paths.index_dir.display());
        return Ok(());
    }

    println!(
        "{:<24} {:>10} {:>10}  {:<24} CREATED",
        "NAME", "DOCUMENTS", "CHUNKS", "MODEL"
    );
    for index in indexes {
        println!(
            "{:<24} {:>10} {:>10}  {:<24} {}",
            index.name,
            index.document_count,
            index.chunk_count,
            index.model,
            index.created_at.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
