use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: ThreadStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub document_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    #[serde(alias = "ready")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub thread_id: Option<String>,
    pub user_id: String,
    pub title: String,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    #[serde(default)]
    pub file_size: u64,
    pub content: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub id: String,
    pub thread_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub vectorized: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewConversationTurn {
    pub thread_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Document,
    ChatHistory,
    ThreadArchive,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::ChatHistory => "chat_history",
            Self::ThreadArchive => "thread_archive",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceMetadata {
    Document {
        document_id: String,
        document_title: String,
        file_name: String,
        file_type: String,
    },
    ChatHistory {
        thread_id: String,
        conversation_count: usize,
        date_range: DateRange,
        group_index: usize,
        roles: Vec<Role>,
        #[serde(default)]
        fallback: bool,
        /// Question turn of a vectorized exchange, which keys the chunk instead of `group_index`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange_turn_id: Option<String>,
    },
    ThreadArchive {
        thread_id: String,
        thread_title: String,
        conversation_count: usize,
        archive_date: DateTime<Utc>,
        date_range: DateRange,
        original_status: ThreadStatus,
    },
}

impl SourceMetadata {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Document { .. } => SourceType::Document,
            Self::ChatHistory { .. } => SourceType::ChatHistory,
            Self::ThreadArchive { .. } => SourceType::ThreadArchive,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: SourceMetadata,
    pub chunk_index: u64,
    pub chunk_size: usize,
    pub processing_timestamp: DateTime<Utc>,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub ingestion_run: Option<Uuid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorChunk {
    pub id: String,
    pub document_id: Option<String>,
    pub user_id: String,
    pub thread_id: Option<String>,
    pub chunk_index: u64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
}

impl VectorChunk {
    pub fn source_type(&self) -> SourceType {
        self.metadata.source.source_type()
    }

    pub fn origin_thread_id(&self) -> Option<&str> {
        match &self.metadata.source {
            SourceMetadata::ThreadArchive { thread_id, .. } => Some(thread_id),
            _ => self.thread_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: VectorChunk,
    pub thread_id: Option<String>,
    pub source_type: SourceType,
    pub similarity: f32,
    pub source_weight: f32,
    pub thread_weight: f32,
    pub final_score: f32,
    pub is_current_thread: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionOptions {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub max_chunks: Option<usize>,
    pub insert_batch_size: Option<usize>,
    pub replace_existing: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestionReport {
    pub success: bool,
    pub message: String,
    pub vector_count: usize,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub truncated: bool,
    pub ingestion_run: Uuid,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalOptions {
    pub max_results: usize,
    pub top_k_per_thread: usize,
    pub max_threads_search: usize,
    pub cross_thread_search: bool,
    pub current_thread_priority: bool,
    pub include_chat_history: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_results: 8,
            top_k_per_thread: 3,
            max_threads_search: 5,
            cross_thread_search: true,
            current_thread_priority: true,
            include_chat_history: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryOptions {
    pub retrieval: Option<RetrievalOptions>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub include_thread_context: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThreadContext {
    pub thread_id: String,
    pub thread_title: String,
    pub conversation_count: usize,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceExcerpt {
    pub content: String,
    pub similarity: f32,
    pub source_type: SourceType,
    pub thread_id: Option<String>,
    pub metadata: ChunkMetadata,
}

/// `(prompt + response) chars / 4`; not a billing figure.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct TokenEstimate(pub u64);

impl TokenEstimate {
    pub fn from_lengths(prompt_chars: usize, response_chars: usize) -> Self {
        Self(((prompt_chars + response_chars) as u64).div_ceil(4))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
pub struct Performance {
    pub search_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
    pub estimated_tokens: TokenEstimate,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResponse {
    pub success: bool,
    pub response: String,
    pub sources: Vec<SourceExcerpt>,
    pub conversation_id: String,
    pub thread_context: Option<ThreadContext>,
    pub performance: Performance,
    pub fallback_generated: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeletionReport {
    pub success: bool,
    pub message: String,
    pub thread_id: String,
    pub archived_conversations: usize,
    pub archive_chunk_id: Option<String>,
}
