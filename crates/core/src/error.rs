use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("{0} not found or access denied")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("failed to generate embeddings for batch {} of {total_batches}: {details}", .batch_index + 1)]
    EmbeddingBatchFailed {
        batch_index: usize,
        total_batches: usize,
        details: String,
    },

    #[error("stored {inserted} of {total} chunks before a batch failed: {details}")]
    StoreWriteFailed {
        inserted: usize,
        total: usize,
        details: String,
    },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RagError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Resource not found or access denied",
            Self::Unauthorized(_) => "Unauthorized access to resource",
            Self::Validation(_) | Self::InvalidChunkConfig(_) => "Request rejected",
            Self::EmbeddingBatchFailed { .. } => "Embedding generation failed",
            Self::StoreWriteFailed { .. } => "Failed to store vector chunks in batches",
            Self::Generation(_) => "Failed to generate a response",
            Self::Store(_) => "Storage backend request failed",
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingBatchFailed { .. }
                | Self::StoreWriteFailed { .. }
                | Self::Generation(_)
                | Self::Store(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureReport {
    pub success: bool,
    pub message: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

impl From<&RagError> for FailureReport {
    fn from(error: &RagError) -> Self {
        let (processed_chunks, total_chunks) = match error {
            RagError::StoreWriteFailed {
                inserted, total, ..
            } => (Some(*inserted), Some(*total)),
            _ => (None, None),
        };

        Self {
            success: false,
            message: error.user_message().to_string(),
            error: error.to_string(),
            processed_chunks,
            total_chunks,
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
