use crate::models::{
    ConversationTurn, Document, DocumentStatus, NewConversationTurn, Thread, ThreadStatus,
    VectorChunk,
};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, bearer: &str) -> Result<String, StoreError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn thread(&self, thread_id: &str, user_id: &str) -> Result<Option<Thread>, StoreError>;

    async fn recent_threads(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>, StoreError>;

    async fn set_thread_status(
        &self,
        thread_id: &str,
        user_id: &str,
        status: ThreadStatus,
    ) -> Result<(), StoreError>;

    async fn touch_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn document(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<Document>, StoreError>;

    async fn set_document_status(
        &self,
        document_id: &str,
        user_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError>;

    async fn conversations(
        &self,
        thread_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationTurn>, StoreError>;

    async fn append_conversation(
        &self,
        turn: NewConversationTurn,
    ) -> Result<ConversationTurn, StoreError>;

    async fn mark_vectorized(&self, turn_ids: &[String]) -> Result<(), StoreError>;

    /// Server-side cascade: thread, its documents, turns and non-archive chunks.
    async fn delete_thread_cascade(&self, thread_id: &str, user_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkScope {
    Thread(String),
    Archives,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert_chunks(&self, chunks: &[VectorChunk]) -> Result<(), StoreError>;

    async fn nearest_chunks(
        &self,
        user_id: &str,
        scope: &ChunkScope,
        query_vector: &[f32],
        limit: usize,
        include_chat_history: bool,
    ) -> Result<Vec<VectorChunk>, StoreError>;

    async fn delete_document_chunks(&self, document_id: &str, user_id: &str) -> Result<usize, StoreError>;

    async fn delete_chat_history_chunks(&self, thread_id: &str, user_id: &str) -> Result<usize, StoreError>;

    async fn archive_chunk(&self, thread_id: &str, user_id: &str) -> Result<Option<VectorChunk>, StoreError>;
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, StoreError>;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, StoreError>;
}

#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, delay: Duration);
}
