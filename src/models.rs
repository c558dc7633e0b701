//! Core data models used throughout Paper Harness.
//!
//! These types represent the document metadata, reference lists, chunks, and
//! retrieved passages that flow through the ingestion and answering pipelines.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hashing;

/// Intrinsic (PDF info dictionary) and filesystem metadata of one document.
///
/// This is everything that feeds the content-addressed id. Field order here
/// does not matter for hashing: the canonical form sorts keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MetadataFields {
    pub filename: String,
    pub path: String,
    pub page_count: u32,
    pub file_size_bytes: u64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub accessed_at: Option<String>,
}

impl MetadataFields {
    /// JSON object of every field, the input to the content-addressed id.
    pub fn to_value(&self) -> Value {
        json!({
            "filename": self.filename,
            "path": self.path,
            "page_count": self.page_count,
            "file_size_bytes": self.file_size_bytes,
            "title": self.title,
            "author": self.author,
            "subject": self.subject,
            "keywords": self.keywords,
            "creator": self.creator,
            "producer": self.producer,
            "creation_date": self.creation_date,
            "modification_date": self.modification_date,
            "created_at": self.created_at,
            "modified_at": self.modified_at,
            "accessed_at": self.accessed_at,
        })
    }
}

/// Normalized metadata record with its content-addressed id.
///
/// `unique_id` is computed once in [`DocumentMetadata::new`] and cannot be
/// changed afterwards. Two documents with identical fields share an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(flatten)]
    fields: MetadataFields,
    unique_id: String,
}

impl DocumentMetadata {
    pub fn new(fields: MetadataFields) -> Self {
        let unique_id = hashing::content_id(&fields.to_value());
        Self { fields, unique_id }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn fields(&self) -> &MetadataFields {
        &self.fields
    }

    pub fn filename(&self) -> &str {
        &self.fields.filename
    }

    /// The extracted title, unless it is missing, blank, or a placeholder.
    pub fn usable_title(&self) -> Option<&str> {
        let title = self.fields.title.as_deref()?.trim();
        if title.is_empty() || title.eq_ignore_ascii_case("unknown") {
            return None;
        }
        Some(title)
    }

    /// Recompute the id from the fields and compare. Used when reloading
    /// metadata from an untrusted persisted index.
    pub fn verify_id(&self) -> bool {
        hashing::content_id(&self.fields.to_value()) == self.unique_id
    }
}

/// Result of metadata extraction.
///
/// Extraction never fails the pipeline: a document whose intrinsic metadata
/// cannot be read yields [`ExtractedMetadata::Failed`] and downstream stages
/// skip it.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExtractedMetadata {
    Complete(DocumentMetadata),
    Failed { filename: String, error: String },
}

impl ExtractedMetadata {
    pub fn complete(self) -> Option<DocumentMetadata> {
        match self {
            ExtractedMetadata::Complete(meta) => Some(meta),
            ExtractedMetadata::Failed { .. } => None,
        }
    }
}

/// A reference entry segmented out of the document's own bibliography.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalReference {
    pub ordinal: usize,
    pub raw_text: String,
}

impl LocalReference {
    /// Display form: `"{ordinal}. {raw_text}"`.
    pub fn display(&self) -> String {
        format!("{}. {}", self.ordinal, self.raw_text)
    }
}

/// A reference resolved through the remote bibliographic service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReference {
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub url: Option<String>,
    pub reference_count: Option<u32>,
}

/// The single reference representation persisted for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum References {
    Local(Vec<LocalReference>),
    Remote(Vec<RemoteReference>),
}

impl References {
    pub fn len(&self) -> usize {
        match self {
            References::Local(entries) => entries.len(),
            References::Remote(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ReferenceKind {
        match self {
            References::Local(_) => ReferenceKind::Local,
            References::Remote(_) => ReferenceKind::Remote,
        }
    }
}

/// Which strategy produced a document's references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Local,
    Remote,
}

/// A slice of a document's normalized text.
///
/// Chunks of the same document share one [`DocumentMetadata`] allocation.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, checked when an index is reloaded.
    pub hash: String,
    pub metadata: Arc<DocumentMetadata>,
}

/// A chunk returned by similarity search for one query.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    /// Raw cosine similarity as produced by the index; never re-normalized.
    pub similarity_score: f32,
    pub citation_refs: BTreeSet<u32>,
}

impl RetrievedPassage {
    /// Citation numbers rendered as `"5, 10, 11"` (empty when none).
    pub fn citation_refs_display(&self) -> String {
        crate::citations::format_citations(&self.citation_refs)
    }
}

/// One question/answer exchange of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub question: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: Option<&str>) -> MetadataFields {
        MetadataFields {
            filename: "paper.pdf".to_string(),
            path: "/docs/paper.pdf".to_string(),
            page_count: 3,
            file_size_bytes: 1024,
            title: title.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_unique_id_is_stable() {
        let a = DocumentMetadata::new(fields(Some("A Study")));
        let b = DocumentMetadata::new(fields(Some("A Study")));
        assert_eq!(a.unique_id(), b.unique_id());
        assert_eq!(a.unique_id().len(), 64);
        assert!(a.verify_id());
    }

    #[test]
    fn test_unique_id_changes_with_fields() {
        let a = DocumentMetadata::new(fields(Some("A Study")));
        let b = DocumentMetadata::new(fields(Some("Another Study")));
        assert_ne!(a.unique_id(), b.unique_id());
    }

    #[test]
    fn test_usable_title_filters_placeholders() {
        assert_eq!(
            DocumentMetadata::new(fields(Some("  Deep Nets "))).usable_title(),
            Some("Deep Nets")
        );
        assert_eq!(DocumentMetadata::new(fields(Some("  "))).usable_title(), None);
        assert_eq!(DocumentMetadata::new(fields(Some("Unknown"))).usable_title(), None);
        assert_eq!(DocumentMetadata::new(fields(None)).usable_title(), None);
    }

    #[test]
    fn test_metadata_json_is_flat() {
        let meta = DocumentMetadata::new(fields(Some("A Study")));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["filename"], "paper.pdf");
        assert_eq!(json["unique_id"], meta.unique_id());
        assert!(json.get("fields").is_none());
    }

    #[test]
    fn test_reference_kind() {
        assert_eq!(References::Local(Vec::new()).kind(), ReferenceKind::Local);
        assert_eq!(References::Remote(Vec::new()).kind(), ReferenceKind::Remote);
    }

    #[test]
    fn test_citation_refs_display() {
        let meta = Arc::new(DocumentMetadata::new(fields(None)));
        let passage = RetrievedPassage {
            chunk: Chunk {
                id: "c".to_string(),
                source_document_id: meta.unique_id().to_string(),
                chunk_index: 0,
                text: "x".to_string(),
                hash: String::new(),
                metadata: meta,
            },
            similarity_score: 0.5,
            citation_refs: [11, 5, 10].into_iter().collect(),
        };
        assert_eq!(passage.citation_refs_display(), "5, 10, 11");
    }
}
