use crate::traits::{EmbeddingModel, GenerationRequest, TextGenerator};
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

const BACKEND: &str = "openai";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

#[derive(Clone)]
pub struct OpenAiClient {
    base: Url,
    api_key: String,
    embedding_model: String,
    dimensions: usize,
    client: Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            api_key: api_key.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            client: Client::new(),
        })
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.embedding_model = model.into();
        self.dimensions = dimensions;
        self
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, StoreError> {
        let url = self.base.join(path)?;
        Ok(self.client.post(url).bearer_auth(&self.api_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, StoreError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {}", text.trim()),
            });
        }
        Ok(response.json().await?)
    }
}

/// Vectors in input order; the API may return `data` out of order.
fn parse_embeddings(body: Value, expected: usize) -> Result<Vec<Vec<f32>>, StoreError> {
    let mut parsed: EmbeddingResponse = serde_json::from_value(body)?;
    if parsed.data.len() != expected {
        return Err(StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!(
                "expected {expected} embeddings, received {}",
                parsed.data.len()
            ),
        });
    }
    parsed.data.sort_by_key(|item| item.index);
    Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
}

fn completion_text(body: &Value) -> Result<String, StoreError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "completion carried no message content".to_string(),
        })
}

#[async_trait]
impl EmbeddingModel for OpenAiClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "no embedding returned".to_string(),
            })
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.post("embeddings")?.json(&json!({
            "model": self.embedding_model,
            "input": texts,
        }));
        let body = self.send(request).await?;
        parse_embeddings(body, texts.len())
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, StoreError> {
        let body = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let response = self.send(self.post("chat/completions")?.json(&body)).await?;
        completion_text(&response)
    }
}
