use thiserror::Error;

/// Error taxonomy for the study pipeline.
///
/// Chunking and indexing errors abort the current upload; retrieval and
/// generation errors abort the current query without touching session
/// history that was already recorded.
#[derive(Debug, Error)]
pub enum StudyError {
    /// The upload could not be read or parsed at all.
    #[error("failed to extract text from {document}: {reason}")]
    Extraction { document: String, reason: String },

    /// The document parsed but yielded no usable text (e.g. a scanned PDF).
    #[error("no extractable text in {0}")]
    NoTextExtracted(String),

    /// The embedding API call failed.
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// Dimension mismatch, snapshot corruption, or other index misuse.
    #[error("vector index error: {0}")]
    Index(String),

    /// Index build aborted partway through embedding the chunk set.
    #[error("index build aborted after {indexed} of {total} chunks: {source}")]
    IndexBuild {
        indexed: usize,
        total: usize,
        #[source]
        source: Box<StudyError>,
    },

    /// The LLM API call failed or returned an unusable response.
    #[error("generation request failed: {0}")]
    Generation(String),

    /// Missing API key or invalid numeric bounds at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Session state could not be persisted or restored.
    #[error("session persistence error: {0}")]
    Session(String),
}

pub type Result<T, E = StudyError> = std::result::Result<T, E>;
