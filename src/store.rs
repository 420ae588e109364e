use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunking::Chunk;
use crate::embeddings::Embedding;
use crate::error::{Result, StudyError};

/// A chunk paired with its embedding. Owned exclusively by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// Flat exact-similarity index over embedded chunks, with an optional
/// JSON snapshot on disk so unchanged documents are not re-embedded.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VectorStore {
    /// Embedding dimension, fixed by the first insert.
    dimension: Option<usize>,
    entries: Vec<EmbeddedChunk>,
    /// Content hash per indexed document, for cache invalidation.
    document_hashes: HashMap<String, String>,
}

impl VectorStore {
    pub fn new() -> Self {
        VectorStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Insert an embedded chunk. The first insert fixes the store's
    /// dimension; any later mismatch is an index error, never a silent
    /// wrong answer at query time.
    pub fn insert(&mut self, chunk: Chunk, embedding: Embedding) -> Result<()> {
        match self.dimension {
            None => self.dimension = Some(embedding.dimension()),
            Some(dimension) if dimension != embedding.dimension() => {
                return Err(StudyError::Index(format!(
                    "chunk {} has dimension {}, index has {}",
                    chunk.id,
                    embedding.dimension(),
                    dimension
                )));
            }
            Some(_) => {}
        }
        self.entries.push(EmbeddedChunk { chunk, embedding });
        Ok(())
    }

    /// Nearest-neighbor search: the `top_k` highest cosine similarities,
    /// descending, ties broken by the chunk's original order. An empty
    /// store returns an empty list; a query of the wrong dimension fails.
    pub fn search(&self, query: &Embedding, top_k: usize) -> Result<Vec<(&Chunk, f32)>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.dimension() != dimension {
            return Err(StudyError::Index(format!(
                "query embedding has dimension {}, index has {dimension}",
                query.dimension()
            )));
        }

        let mut scored: Vec<(&Chunk, f32)> = self
            .entries
            .iter()
            .map(|entry| (&entry.chunk, entry.embedding.cosine_similarity(query)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then(a.0.order_index.cmp(&b.0.order_index))
        });
        scored.truncate(top_k);

        debug!("Search returned {} of {} chunks", scored.len(), self.len());
        Ok(scored)
    }

    /// All chunks from a given 1-based page, in document order.
    pub fn chunks_for_page(&self, page_number: usize) -> Vec<&Chunk> {
        self.entries
            .iter()
            .map(|entry| &entry.chunk)
            .filter(|chunk| chunk.page_number == page_number)
            .collect()
    }

    /// Case-insensitive substring search over chunk texts.
    pub fn keyword_search(&self, keyword: &str) -> Vec<&Chunk> {
        let needle = keyword.to_lowercase();
        self.entries
            .iter()
            .map(|entry| &entry.chunk)
            .filter(|chunk| chunk.text.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn record_document(&mut self, document_id: &str, content_hash: String) {
        self.document_hashes
            .insert(document_id.to_string(), content_hash);
    }

    /// Whether the given document is already indexed with this content.
    pub fn is_current(&self, document_id: &str, content_hash: &str) -> bool {
        self.document_hashes.get(document_id).map(String::as_str) == Some(content_hash)
    }

    /// Write a snapshot to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StudyError::Index(format!("creating {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| StudyError::Index(format!("serializing snapshot: {e}")))?;
        fs::write(path, json)
            .map_err(|e| StudyError::Index(format!("writing {}: {e}", path.display())))?;
        info!("Saved vector store snapshot ({} chunks)", self.len());
        Ok(())
    }

    /// Load a snapshot if one exists. A snapshot whose entries disagree
    /// with its recorded dimension fails the integrity check.
    pub fn load(path: &Path) -> Result<Option<VectorStore>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)
            .map_err(|e| StudyError::Index(format!("reading {}: {e}", path.display())))?;
        let store: VectorStore = serde_json::from_slice(&bytes)
            .map_err(|e| StudyError::Index(format!("corrupt snapshot {}: {e}", path.display())))?;

        if let Some(dimension) = store.dimension {
            if store
                .entries
                .iter()
                .any(|entry| entry.embedding.dimension() != dimension)
            {
                return Err(StudyError::Index(format!(
                    "snapshot {} failed integrity check",
                    path.display()
                )));
            }
        }

        info!("Loaded vector store snapshot ({} chunks)", store.len());
        Ok(Some(store))
    }

    /// Remove a snapshot from disk. Returns whether one existed.
    pub fn clear_snapshot(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)
            .map_err(|e| StudyError::Index(format!("removing {}: {e}", path.display())))?;
        info!("Vector store snapshot cleared");
        Ok(true)
    }
}

/// Hex SHA-256 of document bytes, used to detect unchanged re-uploads.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
