//! Intrinsic and filesystem metadata of a PDF.
//!
//! Reads the document information dictionary with `lopdf` and the file's
//! size and timestamps from the filesystem. Failures never propagate: a
//! document that cannot be introspected becomes
//! [`ExtractedMetadata::Failed`], which the ingest pipeline skips.

use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object};
use tracing::warn;

use crate::models::{DocumentMetadata, ExtractedMetadata, MetadataFields};

/// Extract metadata for the PDF at `path`.
pub fn extract_metadata(path: &Path) -> ExtractedMetadata {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match read_fields(path, &filename) {
        Ok(fields) => ExtractedMetadata::Complete(DocumentMetadata::new(fields)),
        Err(e) => {
            let error = format!("{:#}", e);
            warn!(filename = %filename, error = %error, "metadata extraction failed");
            ExtractedMetadata::Failed { filename, error }
        }
    }
}

fn read_fields(path: &Path, filename: &str) -> Result<MetadataFields> {
    // Filesystem timestamps first so parsing does not disturb the access time.
    let fs_meta = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    let doc = Document::load(path).context("failed to parse PDF")?;
    let info = info_dict(&doc);

    Ok(MetadataFields {
        filename: filename.to_string(),
        path: path.display().to_string(),
        page_count: doc.get_pages().len() as u32,
        file_size_bytes: fs_meta.len(),
        title: info_string(info, b"Title"),
        author: info_string(info, b"Author"),
        subject: info_string(info, b"Subject"),
        keywords: info_string(info, b"Keywords"),
        creator: info_string(info, b"Creator"),
        producer: info_string(info, b"Producer"),
        creation_date: info_string(info, b"CreationDate"),
        modification_date: info_string(info, b"ModDate"),
        created_at: fs_meta.created().ok().map(rfc3339),
        modified_at: fs_meta.modified().ok().map(rfc3339),
        accessed_at: fs_meta.accessed().ok().map(rfc3339),
    })
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

fn info_dict(doc: &Document) -> Option<&Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    let (_, object) = doc.dereference(info).ok()?;
    object.as_dict().ok()
}

fn info_string(info: Option<&Dictionary>, key: &[u8]) -> Option<String> {
    match info?.get(key).ok()? {
        Object::String(bytes, _) => {
            let text = decode_text_string(bytes);
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE when it carries a byte-order mark,
/// otherwise one byte per character.
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_info_and_filesystem_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        test_pdf::write_pdf(&path, &[&["Hello"], &["World"]], Some("Deep Nets"), false);

        let meta = extract_metadata(&path).complete().expect("metadata");
        let fields = meta.fields();
        assert_eq!(fields.filename, "paper.pdf");
        assert_eq!(fields.page_count, 2);
        assert_eq!(fields.title.as_deref(), Some("Deep Nets"));
        assert_eq!(fields.author.as_deref(), Some("A. Smith"));
        assert!(fields.file_size_bytes > 0);
        assert!(fields.modified_at.is_some());
        assert!(meta.verify_id());
    }

    #[test]
    fn test_missing_info_dictionary() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("untitled.pdf");
        test_pdf::write_pdf(&path, &[&["Hello"]], None, false);

        let meta = extract_metadata(&path).complete().expect("metadata");
        assert_eq!(meta.fields().title, None);
        assert_eq!(meta.usable_title(), None);
    }

    #[test]
    fn test_unreadable_file_yields_failed_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        match extract_metadata(&path) {
            ExtractedMetadata::Failed { filename, error } => {
                assert_eq!(filename, "broken.pdf");
                assert!(error.starts_with("failed to parse PDF: "), "{}", error);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gone.pdf");

        match extract_metadata(&path) {
            ExtractedMetadata::Failed { error, .. } => {
                assert!(error.contains("failed to stat"), "{}", error);
                assert!(error.contains("gone.pdf"), "{}", error);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_text_string() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_text_string(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }
}
