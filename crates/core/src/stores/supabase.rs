use crate::models::{
    ChunkMetadata, ConversationTurn, Document, DocumentStatus, NewConversationTurn, Thread,
    ThreadStatus, VectorChunk,
};
use crate::traits::{ChunkScope, IdentityProvider, RecordStore, VectorStore};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const BACKEND: &str = "supabase";

#[derive(Clone)]
pub struct SupabaseStore {
    base: Url,
    service_key: String,
    client: Client,
}

impl SupabaseStore {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            service_key: service_key.into(),
            client: Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(path)?)
    }

    fn rest(&self, method: Method, table: &str) -> Result<RequestBuilder, StoreError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key))
    }

    fn rpc(&self, function: &str) -> Result<RequestBuilder, StoreError> {
        self.rest(Method::POST, &format!("rpc/{function}"))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = checked(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), StoreError> {
        checked(request.send().await?).await?;
        Ok(())
    }
}

async fn checked(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {}", body.trim()),
    })
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|value| format!("\"{}\"", value.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// pgvector text form, e.g. `[0.1,0.2]`.
pub(crate) fn vector_literal(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(f32::to_string).collect();
    format!("[{}]", parts.join(","))
}

/// PostgREST returns `vector` columns as text; older setups return arrays.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEmbedding {
    Values(Vec<f32>),
    Text(String),
}

impl StoredEmbedding {
    fn into_values(self) -> Result<Vec<f32>, StoreError> {
        match self {
            Self::Values(values) => Ok(values),
            Self::Text(text) => Ok(serde_json::from_str(&text)?),
        }
    }
}

#[derive(Serialize)]
struct ChunkRow<'a> {
    id: &'a str,
    document_id: Option<&'a str>,
    user_id: &'a str,
    thread_id: Option<&'a str>,
    chunk_index: u64,
    content: &'a str,
    embedding: String,
    metadata: &'a ChunkMetadata,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a VectorChunk> for ChunkRow<'a> {
    fn from(chunk: &'a VectorChunk) -> Self {
        Self {
            id: &chunk.id,
            document_id: chunk.document_id.as_deref(),
            user_id: &chunk.user_id,
            thread_id: chunk.thread_id.as_deref(),
            chunk_index: chunk.chunk_index,
            content: &chunk.content,
            embedding: vector_literal(&chunk.embedding),
            metadata: &chunk.metadata,
            created_at: chunk.created_at,
        }
    }
}

#[derive(Deserialize)]
struct StoredChunk {
    id: String,
    document_id: Option<String>,
    user_id: String,
    thread_id: Option<String>,
    chunk_index: u64,
    content: String,
    embedding: StoredEmbedding,
    metadata: ChunkMetadata,
    created_at: DateTime<Utc>,
}

impl StoredChunk {
    fn into_chunk(self) -> Result<VectorChunk, StoreError> {
        Ok(VectorChunk {
            id: self.id,
            document_id: self.document_id,
            user_id: self.user_id,
            thread_id: self.thread_id,
            chunk_index: self.chunk_index,
            content: self.content,
            embedding: self.embedding.into_values()?,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseStore {
    async fn authenticate(&self, bearer: &str) -> Result<String, StoreError> {
        let url = self.endpoint("auth/v1/user")?;
        let request = self
            .client
            .get(url)
            .header("apikey", &self.service_key)
            .bearer_auth(bearer);
        let user: Value = self.fetch(request).await?;
        user.pointer("/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "auth response carried no user id".to_string(),
            })
    }
}

#[async_trait]
impl RecordStore for SupabaseStore {
    async fn thread(&self, thread_id: &str, user_id: &str) -> Result<Option<Thread>, StoreError> {
        let request = self.rest(Method::GET, "threads")?.query(&[
            ("id", eq(thread_id)),
            ("user_id", eq(user_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<Thread> = self.fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn recent_threads(&self, user_id: &str, limit: usize) -> Result<Vec<Thread>, StoreError> {
        let request = self.rest(Method::GET, "threads")?.query(&[
            ("user_id", eq(user_id)),
            ("order", "last_activity_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.fetch(request).await
    }

    async fn set_thread_status(
        &self,
        thread_id: &str,
        user_id: &str,
        status: ThreadStatus,
    ) -> Result<(), StoreError> {
        let request = self
            .rest(Method::PATCH, "threads")?
            .query(&[("id", eq(thread_id)), ("user_id", eq(user_id))])
            .json(&json!({ "status": status, "updated_at": Utc::now() }));
        self.execute(request).await
    }

    async fn touch_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let request = self
            .rest(Method::PATCH, "threads")?
            .query(&[("id", eq(thread_id)), ("user_id", eq(user_id))])
            .json(&json!({ "last_activity_at": at }));
        self.execute(request).await
    }

    async fn document(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let request = self.rest(Method::GET, "documents")?.query(&[
            ("id", eq(document_id)),
            ("user_id", eq(user_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<Document> = self.fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn set_document_status(
        &self,
        document_id: &str,
        user_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError> {
        let request = self
            .rest(Method::PATCH, "documents")?
            .query(&[("id", eq(document_id)), ("user_id", eq(user_id))])
            .json(&json!({ "status": status, "updated_at": Utc::now() }));
        self.execute(request).await
    }

    async fn conversations(
        &self,
        thread_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let request = self.rest(Method::GET, "conversations")?.query(&[
            ("thread_id", eq(thread_id)),
            ("user_id", eq(user_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        self.fetch(request).await
    }

    async fn append_conversation(
        &self,
        turn: NewConversationTurn,
    ) -> Result<ConversationTurn, StoreError> {
        let request = self
            .rest(Method::POST, "conversations")?
            .header("Prefer", "return=representation")
            .json(&turn);
        let rows: Vec<ConversationTurn> = self.fetch(request).await?;
        rows.into_iter().next().ok_or_else(|| StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "conversation insert returned no row".to_string(),
        })
    }

    async fn mark_vectorized(&self, turn_ids: &[String]) -> Result<(), StoreError> {
        if turn_ids.is_empty() {
            return Ok(());
        }
        let request = self
            .rest(Method::PATCH, "conversations")?
            .query(&[("id", in_list(turn_ids))])
            .json(&json!({ "vectorized": true }));
        self.execute(request).await
    }

    async fn delete_thread_cascade(&self, thread_id: &str, user_id: &str) -> Result<(), StoreError> {
        let request = self.rpc("delete_thread_cascade")?.json(&json!({
            "p_thread_id": thread_id,
            "p_user_id": user_id,
        }));
        self.execute(request).await
    }
}

#[async_trait]
impl VectorStore for SupabaseStore {
    async fn insert_chunks(&self, chunks: &[VectorChunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let rows: Vec<ChunkRow<'_>> = chunks.iter().map(ChunkRow::from).collect();
        let request = self
            .rest(Method::POST, "vector_chunks")?
            .header("Prefer", "return=minimal")
            .json(&rows);
        self.execute(request).await?;
        debug!(rows = chunks.len(), "vector chunks inserted");
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
        let (thread_id, archives_only) = match scope {
            ChunkScope::Thread(thread_id) => (Some(thread_id.as_str()), false),
            ChunkScope::Archives => (None, true),
        };
        let request = self.rpc("match_vector_chunks")?.json(&json!({
            "p_user_id": user_id,
            "p_thread_id": thread_id,
            "p_archives_only": archives_only,
            "p_include_chat_history": include_chat_history,
            "query_embedding": vector_literal(query_vector),
            "match_count": limit,
        }));
        let rows: Vec<StoredChunk> = self.fetch(request).await?;
        rows.into_iter().map(StoredChunk::into_chunk).collect()
    }

    async fn delete_document_chunks(&self, document_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let request = self
            .rest(Method::DELETE, "vector_chunks")?
            .header("Prefer", "return=representation")
            .query(&[
                ("document_id", eq(document_id)),
                ("user_id", eq(user_id)),
                ("select", "id".to_string()),
            ]);
        let removed: Vec<Value> = self.fetch(request).await?;
        Ok(removed.len())
    }

    async fn delete_chat_history_chunks(&self, thread_id: &str, user_id: &str) -> Result<usize, StoreError> {
        let request = self
            .rest(Method::DELETE, "vector_chunks")?
            .header("Prefer", "return=representation")
            .query(&[
                ("thread_id", eq(thread_id)),
                ("user_id", eq(user_id)),
                ("metadata->source->>kind", eq("chat_history")),
                ("select", "id".to_string()),
            ]);
        let removed: Vec<Value> = self.fetch(request).await?;
        Ok(removed.len())
    }
    async fn archive_chunk(&self, thread_id: &str, user_id: &str) -> Result<Option<VectorChunk>, StoreError> {
        let request = self.rest(Method::GET, "vector_chunks")?.query(&[
            ("user_id", eq(user_id)),
            ("thread_id", "is.null".to_string()),
            ("metadata->source->>kind", eq("thread_archive")),
            ("metadata->source->>thread_id", eq(thread_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<StoredChunk> = self.fetch(request).await?;
        rows.into_iter().next().map(StoredChunk::into_chunk).transpose()
    }
}
