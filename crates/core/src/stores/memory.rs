use crate::models::{
    ConversationTurn, Document, DocumentStatus, NewConversationTurn, SourceMetadata, SourceType,
    Thread, ThreadStatus, VectorChunk,
};
use crate::retrieval::cosine_similarity;
use crate::traits::{ChunkScope, RecordStore, VectorStore};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    threads: HashMap<String, Thread>,
    documents: HashMap<String, Document>,
    conversations: Vec<ConversationTurn>,
    chunks: Vec<VectorChunk>,
    insert_calls: usize,
    fail_insert_batch: Option<usize>,
    fail_cascade: bool,
    fail_document_status: Option<DocumentStatus>,
    operations: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_thread(&self, thread: Thread) {
        self.write().threads.insert(thread.id.clone(), thread);
    }

    pub fn put_document(&self, document: Document) {
        self.write().documents.insert(document.id.clone(), document);
    }

    pub fn put_conversation(&self, turn: ConversationTurn) {
        self.write().conversations.push(turn);
    }

    /// Makes the `batch_index`-th insert call (zero-based, counted from now) fail.
    pub fn fail_insert_batch(&self, batch_index: usize) {
        let mut state = self.write();
        state.fail_insert_batch = Some(state.insert_calls + batch_index);
    }

    /// Makes the next cascade delete fail.
    pub fn fail_cascade(&self) {
        self.write().fail_cascade = true;
    }

    pub fn fail_document_status(&self, status: DocumentStatus) {
        self.write().fail_document_status = Some(status);
    }

    pub fn chunk_count(&self) -> usize {
        self.read().chunks.len()
    }

    pub fn chunks(&self) -> Vec<VectorChunk> {
        self.read().chunks.clone()
    }

    pub fn stored_thread(&self, thread_id: &str) -> Option<Thread> {
        self.read().threads.get(thread_id).cloned()
    }

    pub fn stored_document(&self, document_id: &str) -> Option<Document> {
        self.read().documents.get(document_id).cloned()
    }

    pub fn stored_conversations(&self, thread_id: &str) -> Vec<ConversationTurn> {
        self.read()
            .conversations
            .iter()
            .filter(|turn| turn.thread_id == thread_id)
            .cloned()
            .collect()
    }

    pub fn operations(&self) -> Vec<String> {
        self.read().operations.clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn thread(&self, thread_id: &str, user_id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self
            .read()
            .threads
            .get(thread_id)
            .filter(|thread| thread.user_id == user_id)
            .cloned())
    }

    async fn recent_threads(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>, StoreError> {
        let mut threads: Vec<Thread> = self
            .read()
            .threads
            .values()
            .filter(|thread| thread.user_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|left, right| {
            right
                .last_activity_at
                .cmp(&left.last_activity_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        threads.truncate(limit);
        Ok(threads)
    }

    async fn set_thread_status(
        &self,
        thread_id: &str,
        user_id: &str,
        status: ThreadStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        state
            .operations
            .push(format!("set_thread_status:{}", status.as_str()));
        match state.threads.get_mut(thread_id) {
            Some(thread) if thread.user_id == user_id => {
                thread.status = status;
                Ok(())
            }
            _ => Err(StoreError::Request(format!("thread {thread_id} not found"))),
        }
    }

    async fn touch_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        if let Some(thread) = state
            .threads
            .get_mut(thread_id)
            .filter(|thread| thread.user_id == user_id)
        {
            thread.last_activity_at = at;
        }
        Ok(())
    }

    async fn document(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .read()
            .documents
            .get(document_id)
            .filter(|document| document.user_id == user_id)
            .cloned())
    }

    async fn set_document_status(
        &self,
        document_id: &str,
        user_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        if state.fail_document_status == Some(status) {
            return Err(StoreError::Request(format!(
                "document status update to {status:?} rejected"
            )));
        }
        match state.documents.get_mut(document_id) {
            Some(document) if document.user_id == user_id => {
                document.status = status;
                document.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::Request(format!("document {document_id} not found"))),
        }
    }

    async fn conversations(
        &self,
        thread_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let mut turns: Vec<ConversationTurn> = self
            .read()
            .conversations
            .iter()
            .filter(|turn| turn.thread_id == thread_id && turn.user_id == user_id)
            .cloned()
            .collect();
        turns.sort_by_key(|turn| turn.created_at);
        Ok(turns)
    }

    async fn append_conversation(
        &self,
        turn: NewConversationTurn,
    ) -> Result<ConversationTurn, StoreError> {
        let stored = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            thread_id: turn.thread_id,
            user_id: turn.user_id,
            role: turn.role,
            content: turn.content,
            created_at: Utc::now(),
            vectorized: false,
        };
        let mut state = self.write();
        state
            .operations
            .push(format!("append_conversation:{}", stored.role));
        state.conversations.push(stored.clone());
        Ok(stored)
    }

    async fn mark_vectorized(&self, turn_ids: &[String]) -> Result<(), StoreError> {
        let ids: HashSet<&String> = turn_ids.iter().collect();
        for turn in self.write().conversations.iter_mut() {
            if ids.contains(&turn.id) {
                turn.vectorized = true;
            }
        }
        Ok(())
    }

    async fn delete_thread_cascade(&self, thread_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut state = self.write();
        state
            .operations
            .push(format!("delete_thread_cascade:{thread_id}"));
        if std::mem::take(&mut state.fail_cascade) {
            return Err(StoreError::Request("cascade delete rejected".to_string()));
        }

        let owned = state
            .threads
            .get(thread_id)
            .is_some_and(|thread| thread.user_id == user_id);
        if !owned {
            return Err(StoreError::Request(format!("thread {thread_id} not found")));
        }

        state.threads.remove(thread_id);
        let removed_documents: HashSet<String> = state
            .documents
            .values()
            .filter(|document| document.thread_id.as_deref() == Some(thread_id))
            .map(|document| document.id.clone())
            .collect();
        state
            .documents
            .retain(|id, _| !removed_documents.contains(id));
        state
            .conversations
            .retain(|turn| turn.thread_id != thread_id);
        state.chunks.retain(|chunk| {
            if chunk.source_type() == SourceType::ThreadArchive {
                return true;
            }
            let in_thread = chunk.thread_id.as_deref() == Some(thread_id);
            let in_document = chunk
                .document_id
                .as_ref()
                .is_some_and(|id| removed_documents.contains(id));
            !(in_thread || in_document)
        });
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn insert_chunks(&self, chunks: &[VectorChunk]) -> Result<(), StoreError> {
        let mut state = self.write();
        let call = state.insert_calls;
        state.insert_calls += 1;
        state
            .operations
            .push(format!("insert_chunks:{}", chunks.len()));
        if state.fail_insert_batch == Some(call) {
            return Err(StoreError::Request(format!(
                "insert batch rejected ({} rows)",
                chunks.len()
            )));
        }
        state.chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn nearest_chunks(
        &self,
        user_id: &str,
        scope: &ChunkScope,
        query_vector: &[f32],
        limit: usize,
        include_chat_history: bool,
    ) -> Result<Vec<VectorChunk>, StoreError> {
        let state = self.read();
        let mut scored: Vec<(f32, &VectorChunk)> = state
            .chunks
            .iter()
            .filter(|chunk| chunk.user_id == user_id)
            .filter(|chunk| match scope {
                ChunkScope::Thread(thread_id) => chunk.thread_id.as_deref() == Some(thread_id),
                ChunkScope::Archives => {
                    chunk.thread_id.is_none()
                        && chunk.source_type() == SourceType::ThreadArchive
                }
            })
            .filter(|chunk| include_chat_history || chunk.source_type() != SourceType::ChatHistory)
            .map(|chunk| (cosine_similarity(query_vector, &chunk.embedding), chunk))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    async fn delete_document_chunks(&self, document_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let mut state = self.write();
        let before = state.chunks.len();
        state.chunks.retain(|chunk| {
            !(chunk.user_id == user_id && chunk.document_id.as_deref() == Some(document_id))
        });
        let removed = before - state.chunks.len();
        state
            .operations
            .push(format!("delete_document_chunks:{removed}"));
        Ok(removed)
    }

    async fn delete_chat_history_chunks(&self, thread_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let mut state = self.write();
        let before = state.chunks.len();
        state.chunks.retain(|chunk| {
            !(chunk.user_id == user_id
                && chunk.thread_id.as_deref() == Some(thread_id)
                && chunk.source_type() == SourceType::ChatHistory)
        });
        let removed = before - state.chunks.len();
        state
            .operations
            .push(format!("delete_chat_history_chunks:{removed}"));
        Ok(removed)
    }
    async fn archive_chunk(&self, thread_id: &str, user_id: &str) -> Result<Option<VectorChunk>, StoreError> {
        Ok(self
            .read()
            .chunks
            .iter()
            .find(|chunk| {
                chunk.user_id == user_id
                    && matches!(
                        &chunk.metadata.source,
                        SourceMetadata::ThreadArchive { thread_id: archived, .. } if archived == thread_id
                    )
            })
            .cloned())
    }
}
