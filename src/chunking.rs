use log::info;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{Result, StudyError};

/// A bounded span of source text with positional metadata.
///
/// Immutable once created; destroyed when the owning document is removed
/// from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier, `<document_id>#<order_index>`.
    pub id: String,
    /// The chunk text, tokens joined by single spaces.
    pub text: String,
    /// Identifier of the document this chunk was cut from.
    pub source_document: String,
    /// 1-based page the chunk starts on.
    pub page_number: usize,
    /// Number of tokens in this chunk. Always `<= max_tokens`.
    pub token_count: usize,
    /// Position of the chunk within its document.
    pub order_index: usize,
}

impl Chunk {
    /// Citation marker for this chunk, e.g. `[thesis.pdf:page3]`.
    pub fn citation(&self) -> String {
        format!("[{}:page{}]", self.source_document, self.page_number)
    }
}

/// Split a document into overlapping token windows.
///
/// Tokens are whitespace-delimited words over the page-tagged token
/// stream. Each window holds `max_tokens` tokens and the next window
/// starts `max_tokens - overlap_tokens` after the previous one, so
/// consecutive chunks share exactly `overlap_tokens` tokens. The final
/// window may be shorter and is kept as-is. A chunk is tagged with the
/// page its first token appears on.
pub fn chunk_document(
    document: &Document,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>> {
    if max_tokens == 0 || overlap_tokens >= max_tokens {
        return Err(StudyError::Config(format!(
            "chunk window of {max_tokens} tokens with {overlap_tokens} overlap is invalid"
        )));
    }

    // Flatten pages into one token stream, remembering each token's page.
    let mut tokens: Vec<(&str, usize)> = Vec::new();
    for (page_index, page) in document.pages.iter().enumerate() {
        for token in page.split_whitespace() {
            tokens.push((token, page_index + 1));
        }
    }

    if tokens.is_empty() {
        return Err(StudyError::NoTextExtracted(document.document_id.clone()));
    }

    let step = max_tokens - overlap_tokens;
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = usize::min(start + max_tokens, tokens.len());
        let window = &tokens[start..end];
        let order_index = chunks.len();

        chunks.push(Chunk {
            id: format!("{}#{}", document.document_id, order_index),
            text: window
                .iter()
                .map(|(token, _)| *token)
                .collect::<Vec<_>>()
                .join(" "),
            source_document: document.document_id.clone(),
            page_number: window[0].1,
            token_count: window.len(),
            order_index,
        });

        if end == tokens.len() {
            break;
        }
        start += step;
    }

    info!(
        "Split {} into {} chunks ({} tokens)",
        document.document_id,
        chunks.len(),
        tokens.len()
    );
    Ok(chunks)
}

/// Token count as the chunker sees it.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
