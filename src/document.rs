use std::fs;
use std::path::Path;

use log::{debug, info};
use mime_guess::from_path;
use pdf_extract::extract_text_from_mem_by_pages;

use crate::error::{Result, StudyError};

/// An uploaded document, extracted to text page by page.
#[derive(Debug, Clone)]
pub struct Document {
    /// File name, used as the document identifier.
    pub document_id: String,
    /// Detected MIME type.
    pub mime_type: String,
    /// Normalized text of each page. Plain-text files are a single page.
    pub pages: Vec<String>,
}

impl Document {
    /// Load and extract a document from disk.
    pub fn from_file<P: AsRef<Path>>(file_path: P, max_pdf_size_mb: u64) -> Result<Self> {
        let path = file_path.as_ref();
        let document_id = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StudyError::Extraction {
                document: path.display().to_string(),
                reason: "invalid file name".to_string(),
            })?
            .to_string();

        let bytes = fs::read(path).map_err(|e| StudyError::Extraction {
            document: document_id.clone(),
            reason: e.to_string(),
        })?;

        Self::from_bytes(&document_id, &bytes, max_pdf_size_mb)
    }

    /// Extract a document from an in-memory upload.
    pub fn from_bytes(name: &str, bytes: &[u8], max_pdf_size_mb: u64) -> Result<Self> {
        let size_limit = max_pdf_size_mb * 1024 * 1024;
        if bytes.len() as u64 > size_limit {
            return Err(StudyError::Extraction {
                document: name.to_string(),
                reason: format!(
                    "file is {} bytes, maximum is {max_pdf_size_mb} MB",
                    bytes.len()
                ),
            });
        }

        let mime = from_path(name).first_or_octet_stream();
        let mime_type = mime.to_string();
        debug!("Detected MIME type for {}: {}", name, mime_type);

        let pages = extract_pages(name, bytes, &mime_type)?;
        if pages.iter().all(|page| page.trim().is_empty()) {
            return Err(StudyError::NoTextExtracted(name.to_string()));
        }

        Ok(Document {
            document_id: name.to_string(),
            mime_type,
            pages,
        })
    }

    /// Total extracted text length across pages, in characters.
    pub fn text_len(&self) -> usize {
        self.pages.iter().map(|page| page.len()).sum()
    }
}

fn extract_pages(name: &str, bytes: &[u8], mime_type: &str) -> Result<Vec<String>> {
    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Extracting PDF document: {}", name);
            let pages =
                extract_text_from_mem_by_pages(bytes).map_err(|e| StudyError::Extraction {
                    document: name.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(pages.iter().map(|page| normalize_whitespace(page)).collect())
        }

        mime if mime.starts_with("text/") => {
            info!("Reading text document: {}", name);
            let content =
                String::from_utf8(bytes.to_vec()).map_err(|e| StudyError::Extraction {
                    document: name.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(vec![normalize_whitespace(&content)])
        }

        other => Err(StudyError::Extraction {
            document: name.to_string(),
            reason: format!("unsupported document format: {other}"),
        }),
    }
}

/// Collapse runs of spaces and reduce blank-line runs to a single
/// paragraph break. PDF extraction tends to produce both.
fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.replace('\r', "").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !normalized.is_empty();
            continue;
        }
        if pending_blank {
            normalized.push_str("\n\n");
            pending_blank = false;
        } else if !normalized.is_empty() {
            normalized.push('\n');
        }
        normalized.push_str(&collapsed);
    }

    normalized
}
