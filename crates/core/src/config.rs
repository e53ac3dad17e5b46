use crate::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::models::RetrievalOptions;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionDefaults {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks_per_document: usize,
    pub max_chunks_per_chat_history: usize,
    pub max_content_chars: usize,
    pub min_chat_group_chars: usize,
    pub chat_idle_gap_minutes: i64,
    pub replace_existing: bool,
}

impl Default for IngestionDefaults {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_chunks_per_document: 1_000,
            max_chunks_per_chat_history: 200,
            max_content_chars: 1_000_000,
            min_chat_group_chars: 50,
            chat_idle_gap_minutes: 60,
            replace_existing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingBatchConfig {
    pub max_batch_size: usize,
    pub delay_ms: u64,
}

impl Default for EmbeddingBatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            delay_ms: 1_000,
        }
    }
}

impl EmbeddingBatchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriterConfig {
    pub insert_batch_size: usize,
    pub delay_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: 100,
            delay_ms: 100,
        }
    }
}

impl WriterConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub fallback_temperature: f32,
    pub fallback_max_tokens: u32,
    pub context_window_chars: usize,
    pub excerpt_chars: usize,
    pub auto_vectorize_fallback: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2_000,
            fallback_temperature: 0.8,
            fallback_max_tokens: 1_500,
            context_window_chars: 4_000,
            excerpt_chars: 200,
            auto_vectorize_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub ingestion: IngestionDefaults,
    pub embedding: EmbeddingBatchConfig,
    pub writer: WriterConfig,
    pub retrieval: RetrievalOptions,
    pub generation: GenerationConfig,
}

impl RagConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            StoreError::Request(format!("unable to read config {}: {error}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}
