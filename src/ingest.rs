//! PDF ingestion pipeline.
//!
//! Turns a folder of PDFs into a folder of per-document artifacts:
//!
//! ```text
//! documents/                       documents_with_data/
//!   deep_nets.pdf        ──▶         deep_nets/
//!                                      <unique_id>.json     metadata + content-addressed id
//!                                      references.txt       local references, or
//!                                      references.json      remote references
//!                                      deep_nets.pdf        copy of the source
//!                                      image0.jpg ...       embedded images
//! ```
//!
//! Documents are independent: a failure is logged, counted and the batch
//! moves on to the next file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract::{extract_images, extract_pages};
use crate::metadata::extract_metadata;
use crate::models::{ExtractedMetadata, ReferenceKind, References};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::references::{
    format_local_references, ReferenceChain, ReferenceInput, SemanticScholarClient,
};
use crate::retry::{RetryPolicy, TokioSleeper};

/// Longest sanitized stem kept in file and folder names.
pub const MAX_NAME_LEN: usize = 50;

/// Lower-case, spaces to underscores, drop anything outside `[a-z0-9_.]`.
fn sanitize_stem(stem: &str) -> String {
    stem.to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '.')
        .take(MAX_NAME_LEN)
        .collect()
}

fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

/// Sanitized file name: stem sanitized and cut to [`MAX_NAME_LEN`]
/// characters, then the extension (lower-cased). A stem with nothing left
/// after sanitizing becomes `document`.
pub fn sanitize_filename(file_name: &str) -> String {
    let (stem, ext) = split_name(file_name);
    let mut stem = sanitize_stem(stem);
    if stem.is_empty() {
        stem = "document".to_string();
    }
    match ext {
        Some(ext) => format!("{}.{}", stem, ext.to_lowercase()),
        None => stem,
    }
}

/// Name of the per-document output folder for `pdf`.
pub fn output_folder_name(pdf: &Path) -> String {
    let file_name = pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized = sanitize_filename(&file_name);
    let (stem, _) = split_name(&sanitized);
    stem.to_string()
}

fn pdf_globset() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(GlobBuilder::new("**/*.pdf").case_insensitive(true).build()?);
    Ok(builder.build()?)
}

/// Every PDF under `root`, sorted by path.
pub fn discover_pdfs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Folder does not exist: {}", root.display());
    }
    let include = pdf_globset()?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include.is_match(relative) {
            found.push(path.to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Rename every PDF under `root` to its sanitized name, in place.
///
/// Files already sanitized are left alone, and so are files whose target
/// name is taken. Returns the `(from, to)` pairs actually renamed.
pub fn rename_inputs(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut renamed = Vec::new();
    for path in discover_pdfs(root)? {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let target = path.with_file_name(sanitize_filename(&file_name));
        if target == path {
            continue;
        }
        if target.exists() {
            warn!(from = %path.display(), to = %target.display(), "rename target exists, skipping");
            continue;
        }
        std::fs::rename(&path, &target)
            .with_context(|| format!("failed to rename {}", path.display()))?;
        info!(from = %path.display(), to = %target.display(), "renamed");
        renamed.push((path, target));
    }
    Ok(renamed)
}

/// What ingesting one document produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub filename: String,
    pub unique_id: String,
    pub output_dir: PathBuf,
    /// `None` when no references were found.
    pub references: Option<ReferenceKind>,
    pub reference_count: usize,
    pub images: usize,
}

/// Ingest one PDF into `{output_root}/{folder}/`.
///
/// A document whose metadata cannot be read is an error and nothing is
/// written for it. Unreadable page text or images only reduce what is
/// extracted.
pub async fn ingest_document(
    pdf: &Path,
    output_root: &Path,
    references: &ReferenceChain,
) -> Result<DocumentReport> {
    let metadata = match extract_metadata(pdf) {
        ExtractedMetadata::Complete(meta) => meta,
        ExtractedMetadata::Failed { filename, error } => {
            bail!("cannot read metadata of {}: {}", filename, error)
        }
    };
    info!(filename = metadata.filename(), unique_id = metadata.unique_id(), "ingesting");

    let pages = extract_pages(pdf).unwrap_or_else(|e| {
        warn!(filename = metadata.filename(), error = %e, "no page text");
        Vec::new()
    });

    let output_dir = output_root.join(output_folder_name(pdf));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    std::fs::write(
        output_dir.join(format!("{}.json", metadata.unique_id())),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    let resolved = references
        .resolve(&ReferenceInput {
            metadata: &metadata,
            pages: &pages,
        })
        .await;
    match &resolved {
        Some(References::Local(entries)) => {
            std::fs::write(output_dir.join("references.txt"), format_local_references(entries))?;
        }
        Some(References::Remote(entries)) => {
            std::fs::write(
                output_dir.join("references.json"),
                serde_json::to_string_pretty(entries)?,
            )?;
        }
        None => {}
    }

    std::fs::copy(pdf, output_dir.join(metadata.filename()))
        .with_context(|| format!("failed to copy {}", pdf.display()))?;

    let images = extract_images(pdf).unwrap_or_else(|e| {
        warn!(filename = metadata.filename(), error = %e, "image extraction failed");
        Vec::new()
    });
    let mut written = 0;
    for image in &images {
        let path = output_dir.join(format!("image{}.{}", written, image.extension));
        match std::fs::write(&path, &image.data) {
            Ok(()) => written += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write image"),
        }
    }

    Ok(DocumentReport {
        filename: metadata.filename().to_string(),
        unique_id: metadata.unique_id().to_string(),
        output_dir,
        references: resolved.as_ref().map(References::kind),
        reference_count: resolved.as_ref().map_or(0, References::len),
        images: written,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub processed: usize,
    pub failed: usize,
    pub references_remote: usize,
    pub references_local: usize,
    pub references_none: usize,
    pub images: usize,
    pub reports: Vec<DocumentReport>,
}

/// Ingest every PDF in `pdfs`. Per-document failures are counted, never
/// propagated.
pub async fn ingest_all(
    pdfs: &[PathBuf],
    output_root: &Path,
    references: &ReferenceChain,
    progress: &dyn ProgressReporter,
) -> IngestSummary {
    let mut summary = IngestSummary::default();
    let total = pdfs.len() as u64;

    for (i, pdf) in pdfs.iter().enumerate() {
        match ingest_document(pdf, output_root, references).await {
            Ok(report) => {
                summary.processed += 1;
                match report.references {
                    Some(ReferenceKind::Remote) => summary.references_remote += 1,
                    Some(ReferenceKind::Local) => summary.references_local += 1,
                    None => summary.references_none += 1,
                }
                summary.images += report.images;
                summary.reports.push(report);
            }
            Err(e) => {
                warn!(path = %pdf.display(), error = %format!("{:#}", e), "document failed");
                summary.failed += 1;
            }
        }
        progress.report(ProgressEvent::Ingesting {
            n: i as u64 + 1,
            total,
            document: pdf
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        });
    }
    summary
}

/// Reference chain for `config`: remote then local, or local only when
/// remote lookups are disabled.
pub fn reference_chain(config: &Config) -> Result<ReferenceChain> {
    if !config.references.enabled {
        return Ok(ReferenceChain::local_only());
    }
    let api = SemanticScholarClient::new(&config.references)?;
    Ok(ReferenceChain::remote_then_local(
        Arc::new(api),
        RetryPolicy::from_config(&config.references),
        Arc::new(TokioSleeper),
    ))
}

/// `pharness ingest`.
pub async fn run_ingest(
    config: &Config,
    rename: bool,
    local_only: bool,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let input = &config.paths.input_dir;
    if rename {
        let renamed = rename_inputs(input)?;
        for (from, to) in &renamed {
            println!("Renamed: {} to {}", from.display(), to.display());
        }
    }

    let pdfs = discover_pdfs(input)?;
    if pdfs.is_empty() {
        println!("No PDF files found in folder: {}", input.display());
        return Ok(IngestSummary::default());
    }

    let chain = if local_only {
        ReferenceChain::local_only()
    } else {
        reference_chain(config)?
    };
    std::fs::create_dir_all(&config.paths.output_dir)?;

    let summary = ingest_all(&pdfs, &config.paths.output_dir, &chain, progress).await;

    println!("ingest {}", input.display());
    println!("  documents found: {}", pdfs.len());
    println!("  processed: {}", summary.processed);
    println!("  failed: {}", summary.failed);
    println!("  references (remote): {}", summary.references_remote);
    println!("  references (local): {}", summary.references_local);
    println!("  references (none): {}", summary.references_none);
    println!("  images extracted: {}", summary.images);
    println!("  output: {}", config.paths.output_dir.display());

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::test_pdf::write_pdf;
    use crate::progress::NoProgress;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Deep Nets (2020).pdf"), "deep_nets_2020.pdf");
        assert_eq!(sanitize_filename("UPPER.PDF"), "upper.pdf");
        assert_eq!(sanitize_filename("v1.2 final.pdf"), "v1.2_final.pdf");
        assert_eq!(sanitize_filename("ünïcødé.pdf"), "ncd.pdf");
        assert_eq!(sanitize_filename("!!!.pdf"), "document.pdf");
    }

    #[test]
    fn test_sanitize_truncates_stem_not_extension() {
        let long = format!("{}.pdf", "a".repeat(80));
        let out = sanitize_filename(&long);
        assert_eq!(out, format!("{}.pdf", "a".repeat(MAX_NAME_LEN)));
    }

    #[test]
    fn test_output_folder_name() {
        assert_eq!(output_folder_name(Path::new("/in/My Paper.pdf")), "my_paper");
        let long = format!("/in/{}.pdf", "b".repeat(70));
        assert_eq!(output_folder_name(Path::new(&long)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_discover_is_case_insensitive_and_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("A.PDF"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.pdf"), b"x").unwrap();

        let found = discover_pdfs(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A.PDF", "b.pdf", "sub/c.pdf"]);
    }

    #[test]
    fn test_discover_missing_folder() {
        let err = discover_pdfs(Path::new("/nonexistent/papers")).unwrap_err();
        assert!(err.to_string().contains("Folder does not exist"));
    }

    #[test]
    fn test_rename_inputs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("My Paper.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("done.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("Taken.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("taken.pdf"), b"y").unwrap();

        let renamed = rename_inputs(dir.path()).unwrap();
        assert_eq!(renamed.len(), 1);
        assert!(dir.path().join("my_paper.pdf").exists());
        assert!(dir.path().join("Taken.pdf").exists());
        assert_eq!(std::fs::read(dir.path().join("taken.pdf")).unwrap(), b"y");
    }

    #[tokio::test]
    async fn test_ingest_document_writes_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        let pdf = input.join("paper.pdf");
        write_pdf(
            &pdf,
            &[&["Intro text"], &["References", "[1] Smith, J. 2020."]],
            None,
            true,
        );

        let report = ingest_document(&pdf, &output, &ReferenceChain::local_only())
            .await
            .unwrap();

        let folder = output.join("paper");
        assert_eq!(report.output_dir, folder);
        assert!(folder.join(format!("{}.json", report.unique_id)).exists());
        assert!(folder.join("paper.pdf").exists());
        assert!(folder.join("image0.jpg").exists());
        assert_eq!(report.images, 1);
        assert_eq!(report.references, Some(ReferenceKind::Local));
        assert_eq!(
            std::fs::read_to_string(folder.join("references.txt")).unwrap(),
            "1. [1] Smith, J. 2020."
        );

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(folder.join(format!("{}.json", report.unique_id))).unwrap())
                .unwrap();
        assert_eq!(json["unique_id"], report.unique_id.as_str());
        assert_eq!(json["page_count"], 2);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("broken.pdf"), b"not a pdf").unwrap();
        write_pdf(&input.join("good.pdf"), &[&["Plain body text only"]], None, false);
        write_pdf(
            &input.join("cited.pdf"),
            &[&["Body"], &["References", "[1] Smith, J. 2020."]],
            None,
            false,
        );

        let pdfs = discover_pdfs(&input).unwrap();
        let summary = ingest_all(
            &pdfs,
            &dir.path().join("out"),
            &ReferenceChain::local_only(),
            &NoProgress,
        )
        .await;

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.references_none, 1);
        assert_eq!(summary.references_local, 1);
        assert_eq!(summary.references_remote, 0);
        assert!(!dir.path().join("out/broken").exists());
        assert!(dir.path().join("out/good/good.pdf").exists());
    }
}
