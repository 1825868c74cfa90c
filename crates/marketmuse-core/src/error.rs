//! Error taxonomy shared by every stage of ingestion and retrieval.
//!
//! Ingestion failures are reported per document by the application layer;
//! nothing in this crate aborts a whole batch on a single bad input.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No extractor is registered for the declared or detected format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The extractor recognised the format but could not parse the bytes.
    #[error("corrupt {format} input: {reason}")]
    CorruptInput { format: String, reason: String },

    #[error("invalid chunk config: {0}")]
    InvalidChunkConfig(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// Vectors of a different dimensionality than the index was created with.
    #[error("dimension mismatch: index holds {expected}-d vectors, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index I/O error: {0}")]
    IndexIo(String),

    #[error("generation service error: {0}")]
    GenerationService(String),
}

impl Error {
    pub fn corrupt(format: &str, reason: impl std::fmt::Display) -> Self {
        Error::CorruptInput {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable code, used in ingestion reports and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::CorruptInput { .. } => "corrupt_input",
            Error::InvalidChunkConfig(_) => "invalid_chunk_config",
            Error::EmbeddingService(_) => "embedding_service",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::IndexIo(_) => "index_io",
            Error::GenerationService(_) => "generation_service",
        }
    }
}
