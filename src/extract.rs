//! Page text and embedded image extraction for PDFs.
//!
//! Text comes from `pdf-extract`, one string per page so the reference
//! locator can scan pages individually. Images are raw image XObject streams
//! read with `lopdf`; the file extension follows the stream filter.
//!
//! | Filter | Extension |
//! |--------|-----------|
//! | `DCTDecode` | `jpg` |
//! | `JPXDecode` | `jp2` |
//! | anything else | `bin` (stream bytes as stored) |

use std::collections::BTreeSet;
use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PDF: {0}")]
    Pdf(String),

    #[error("text extraction failed: {0}")]
    Text(String),
}

/// An embedded image, ready to be written as `image{n}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub extension: &'static str,
    pub data: Vec<u8>,
}

/// Extract the text of every page, in page order.
///
/// `pdf-extract` panics on some fonts and encodings it does not support; a
/// panic is reported as [`ExtractError::Text`] like any other failure.
pub fn extract_pages(path: &Path) -> Result<Vec<String>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&bytes))
        .map_err(|payload| ExtractError::Text(panic_message(payload.as_ref())))?
        .map_err(|e| ExtractError::Text(e.to_string()))?;
    debug!(path = %path.display(), pages = pages.len(), "extracted page text");
    Ok(pages)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("pdf-extract panicked: {}", message)
}

/// Extract every image XObject referenced from a page, in page order.
///
/// An image referenced from several pages is returned once. A stream that
/// cannot be read is logged and skipped.
pub fn extract_images(path: &Path) -> Result<Vec<ExtractedImage>, ExtractError> {
    let doc = Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let mut seen: BTreeSet<ObjectId> = BTreeSet::new();
    let mut images = Vec::new();

    for (page_number, page_id) in doc.get_pages() {
        for image_id in page_image_ids(&doc, page_id) {
            if !seen.insert(image_id) {
                continue;
            }
            match read_image(&doc, image_id) {
                Some(image) => images.push(image),
                None => warn!(page = page_number, object = ?image_id, "skipping unreadable image"),
            }
        }
    }
    Ok(images)
}

fn page_image_ids(doc: &Document, page_id: ObjectId) -> Vec<ObjectId> {
    let xobjects = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .and_then(|page| page.get(b"Resources"))
        .and_then(|res| doc.dereference(res))
        .and_then(|(_, res)| res.as_dict())
        .and_then(|res| res.get(b"XObject"))
        .and_then(|x| doc.dereference(x))
        .and_then(|(_, x)| x.as_dict());

    let Ok(xobjects) = xobjects else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, object)| object.as_reference().ok())
        .filter(|id| {
            doc.get_object(*id)
                .and_then(Object::as_stream)
                .and_then(|s| s.dict.get(b"Subtype"))
                .and_then(Object::as_name)
                .is_ok_and(|name| name == b"Image")
        })
        .collect()
}

fn read_image(doc: &Document, id: ObjectId) -> Option<ExtractedImage> {
    let stream = doc.get_object(id).and_then(Object::as_stream).ok()?;
    let filter = stream.dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.clone()),
        Object::Array(items) => items.last().and_then(|i| i.as_name().ok()).map(<[u8]>::to_vec),
        _ => None,
    });
    Some(ExtractedImage {
        extension: extension_for_filter(filter.as_deref()),
        data: stream.content.clone(),
    })
}

pub fn extension_for_filter(filter: Option<&[u8]>) -> &'static str {
    match filter {
        Some(b"DCTDecode") => "jpg",
        Some(b"JPXDecode") => "jp2",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::test_pdf::write_pdf;

    #[test]
    fn test_extract_pages_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("two.pdf");
        write_pdf(&path, &[&["first page"], &["second page"]], None, false);

        let pages = extract_pages(&path).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("first page"));
        assert!(pages[1].contains("second page"));
    }

    /// Give every font in the file an encoding pdf-extract does not know.
    fn break_font_encoding(path: &Path) {
        let mut doc = Document::load(path).unwrap();
        for object in doc.objects.values_mut() {
            if let Object::Dictionary(dict) = object {
                let is_font = dict
                    .get(b"Type")
                    .and_then(Object::as_name)
                    .map_or(false, |name| name == b"Font".as_slice());
                if is_font {
                    dict.set("Encoding", Object::Name(b"BogusEncoding".to_vec()));
                }
            }
        }
        doc.save(path).unwrap();
    }

    #[test]
    fn test_extractor_panic_becomes_text_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("odd_font.pdf");
        write_pdf(&path, &[&["unreadable"]], None, false);
        break_font_encoding(&path);

        let err = extract_pages(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Text(_)));
        assert!(err.to_string().contains("BogusEncoding"), "{}", err);
    }

    #[test]
    fn test_extract_jpeg_image() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("img.pdf");
        write_pdf(&path, &[&["caption"]], None, true);

        let images = extract_images(&path).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].extension, "jpg");
        assert_eq!(images[0].data, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn test_no_images() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plain.pdf");
        write_pdf(&path, &[&["text only"]], None, false);
        assert!(extract_images(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = extract_pages(Path::new("/nonexistent/file.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }

    #[test]
    fn test_extension_for_filter() {
        assert_eq!(extension_for_filter(Some(b"DCTDecode")), "jpg");
        assert_eq!(extension_for_filter(Some(b"JPXDecode")), "jp2");
        assert_eq!(extension_for_filter(Some(b"FlateDecode")), "bin");
        assert_eq!(extension_for_filter(None), "bin");
    }
}
