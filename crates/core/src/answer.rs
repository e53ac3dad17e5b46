use crate::config::RagConfig;
use crate::ingest::IngestionOrchestrator;
use crate::models::{
    ConversationTurn, NewConversationTurn, Performance, QueryOptions, QueryResponse, Role,
    ThreadContext, ThreadStatus, TokenEstimate,
};
use crate::prompts::{build_context, excerpts, fallback_prompt, grounded_prompt};
use crate::retrieval::RetrievalEngine;
use crate::traits::{
    EmbeddingModel, GenerationRequest, Pacer, RecordStore, TextGenerator, VectorStore,
};
use crate::RagError;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

pub struct AnswerGenerator<'a, R: ?Sized, V: ?Sized, E: ?Sized, G: ?Sized> {
    records: &'a R,
    vectors: &'a V,
    embedder: &'a E,
    generator: &'a G,
    pacer: &'a dyn Pacer,
    config: &'a RagConfig,
}

impl<'a, R, V, E, G> AnswerGenerator<'a, R, V, E, G>
where
    R: RecordStore + ?Sized,
    V: VectorStore + ?Sized,
    E: EmbeddingModel + ?Sized,
    G: TextGenerator + ?Sized,
{
    pub fn new(
        records: &'a R,
        vectors: &'a V,
        embedder: &'a E,
        generator: &'a G,
        pacer: &'a dyn Pacer,
        config: &'a RagConfig,
    ) -> Self {
        Self {
            records,
            vectors,
            embedder,
            generator,
            pacer,
            config,
        }
    }

    pub async fn query(
        &self,
        thread_id: &str,
        user_id: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse, RagError> {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }

        let thread = self
            .records
            .thread(thread_id, user_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("thread {thread_id}")))?;
        if thread.status == ThreadStatus::Archived {
            return Err(RagError::Validation(format!(
                "thread \"{}\" is archived and cannot be queried",
                thread.title
            )));
        }

        let thread_context = if options.include_thread_context {
            let turns = self.records.conversations(thread_id, user_id).await?;
            Some(ThreadContext {
                thread_id: thread.id.clone(),
                thread_title: thread.title.clone(),
                conversation_count: turns.len(),
                last_activity: thread.last_activity_at,
            })
        } else {
            None
        };

        let retrieval_options = options
            .retrieval
            .clone()
            .unwrap_or_else(|| self.config.retrieval.clone());
        let retrieval = RetrievalEngine::new(self.records, self.vectors, self.embedder)
            .retrieve(query, thread_id, user_id, &retrieval_options)
            .await?;
        let search_ms = retrieval.elapsed_ms;

        let generation = &self.config.generation;
        let fallback = retrieval.chunks.is_empty();
        let request = if fallback {
            info!(thread_id, "no relevant context found, generating fallback answer");
            GenerationRequest {
                prompt: fallback_prompt(query, thread_context.as_ref()),
                model: options.model.clone().unwrap_or_else(|| generation.model.clone()),
                temperature: generation.fallback_temperature,
                max_tokens: generation.fallback_max_tokens,
            }
        } else {
            let context = build_context(&retrieval.chunks, generation.context_window_chars);
            GenerationRequest {
                prompt: grounded_prompt(query, &context, thread_context.as_ref()),
                model: options.model.clone().unwrap_or_else(|| generation.model.clone()),
                temperature: options.temperature.unwrap_or(generation.temperature),
                max_tokens: options.max_tokens.unwrap_or(generation.max_tokens),
            }
        };

        let generation_started = Instant::now();
        let response = self
            .generator
            .generate(&request)
            .await
            .map_err(|error| RagError::Generation(error.to_string()))?
            .trim()
            .to_string();
        let generation_ms = generation_started.elapsed().as_millis() as u64;

        let (question, answer) = self.persist_exchange(thread_id, user_id, query, &response).await?;

        if fallback && generation.auto_vectorize_fallback {
            let ingestion = IngestionOrchestrator::new(
                self.records,
                self.vectors,
                self.embedder,
                self.pacer,
                self.config,
            );
            match ingestion.ingest_exchange(&question, &answer).await {
                Ok(chunk_id) => info!(thread_id, chunk_id = %chunk_id, "fallback exchange vectorized"),
                Err(error) => warn!(thread_id, error = %error, "fallback exchange vectorization failed"),
            }
        }

        self.records
            .touch_thread(thread_id, user_id, Utc::now())
            .await?;

        let estimated_tokens =
            TokenEstimate::from_lengths(request.prompt.chars().count(), response.chars().count());
        let total_ms = started.elapsed().as_millis() as u64;
        info!(
            thread_id,
            fallback,
            sources = retrieval.chunks.len(),
            search_ms,
            generation_ms,
            total_ms,
            estimated_tokens = estimated_tokens.0,
            "query answered"
        );

        Ok(QueryResponse {
            success: true,
            response,
            sources: excerpts(&retrieval.chunks, generation.excerpt_chars),
            conversation_id: question.id,
            thread_context,
            performance: Performance {
                search_ms,
                generation_ms,
                total_ms,
                estimated_tokens,
            },
            fallback_generated: fallback,
        })
    }

    async fn persist_exchange(
        &self,
        thread_id: &str,
        user_id: &str,
        query: &str,
        response: &str,
    ) -> Result<(ConversationTurn, ConversationTurn), RagError> {
        let question = self
            .records
            .append_conversation(NewConversationTurn {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                role: Role::User,
                content: query.to_string(),
            })
            .await?;
        let answer = self
            .records
            .append_conversation(NewConversationTurn {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                role: Role::Assistant,
                content: response.to_string(),
            })
            .await?;
        Ok((question, answer))
    }
}
