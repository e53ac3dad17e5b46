use crate::batching::EmbeddingBatcher;
use crate::chunking::{ChunkingConfig, TextSplitter};
use crate::config::{RagConfig, WriterConfig};
use crate::conversation::{build_chat_groups, render_exchange};
use crate::models::{
    ChunkMetadata, ConversationTurn, DateRange, Document, DocumentStatus, IngestionOptions,
    IngestionReport, Role, SourceMetadata, VectorChunk,
};
use crate::traits::{EmbeddingModel, Pacer, RecordStore, VectorStore};
use crate::writer::{PartialWrite, VectorStoreWriter};
use crate::RagError;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct IngestionOrchestrator<'a, R: ?Sized, V: ?Sized, E: ?Sized> {
    records: &'a R,
    vectors: &'a V,
    embedder: &'a E,
    pacer: &'a dyn Pacer,
    config: &'a RagConfig,
}

struct Settings {
    chunking: ChunkingConfig,
    max_chunks: usize,
    writer: WriterConfig,
    replace_existing: bool,
}

impl<'a, R, V, E> IngestionOrchestrator<'a, R, V, E>
where
    R: RecordStore + ?Sized,
    V: VectorStore + ?Sized,
    E: EmbeddingModel + ?Sized,
{
    pub fn new(
        records: &'a R,
        vectors: &'a V,
        embedder: &'a E,
        pacer: &'a dyn Pacer,
        config: &'a RagConfig,
    ) -> Self {
        Self {
            records,
            vectors,
            embedder,
            pacer,
            config,
        }
    }

    fn settings(&self, options: &IngestionOptions, default_max_chunks: usize) -> Result<Settings, RagError> {
        let defaults = &self.config.ingestion;
        let chunking = ChunkingConfig::new(
            options.chunk_size.unwrap_or(defaults.chunk_size),
            options.chunk_overlap.unwrap_or(defaults.chunk_overlap),
        )?;
        let mut writer = self.config.writer.clone();
        if let Some(batch_size) = options.insert_batch_size {
            writer.insert_batch_size = batch_size;
        }

        Ok(Settings {
            chunking,
            max_chunks: options.max_chunks.unwrap_or(default_max_chunks),
            writer,
            replace_existing: options.replace_existing.unwrap_or(defaults.replace_existing),
        })
    }

    pub async fn ingest_document(
        &self,
        document_id: &str,
        user_id: &str,
        options: &IngestionOptions,
    ) -> Result<IngestionReport, RagError> {
        let started = Instant::now();
        let document = self
            .records
            .document(document_id, user_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {document_id}")))?;

        let content = match document.content.as_deref() {
            Some(content) if !content.trim().is_empty() => content,
            _ => {
                return Err(RagError::Validation(
                    "document has no content to vectorize".to_string(),
                ))
            }
        };

        let content_chars = content.chars().count();
        let ceiling = self.config.ingestion.max_content_chars;
        if content_chars > ceiling {
            return Err(RagError::Validation(format!(
                "content length {content_chars} exceeds limit of {ceiling}"
            )));
        }

        let settings = self.settings(options, self.config.ingestion.max_chunks_per_document)?;

        self.records
            .set_document_status(document_id, user_id, DocumentStatus::Processing)
            .await?;
        info!(document_id, title = %document.title, content_chars, "document vectorization started");

        let outcome = match self.vectorize_document(&document, content, &settings).await {
            Ok(report) => self
                .records
                .set_document_status(document_id, user_id, DocumentStatus::Completed)
                .await
                .map(|()| report)
                .map_err(RagError::from),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(mut report) => {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    document_id,
                    processed_chunks = report.processed_chunks,
                    total_chunks = report.total_chunks,
                    elapsed_ms = report.elapsed_ms,
                    "document vectorization completed"
                );
                Ok(report)
            }
            Err(error) => {
                if let Err(status_error) = self
                    .records
                    .set_document_status(document_id, user_id, DocumentStatus::Failed)
                    .await
                {
                    warn!(document_id, error = %status_error, "could not mark document failed");
                }
                Err(error)
            }
        }
    }

    async fn vectorize_document(
        &self,
        document: &Document,
        content: &str,
        settings: &Settings,
    ) -> Result<IngestionReport, RagError> {
        let run = Uuid::new_v4();
        let mut texts = TextSplitter::new(settings.chunking).split(content);
        let total_chunks = texts.len();
        texts.truncate(settings.max_chunks);
        let processed_chunks = texts.len();
        let truncated = total_chunks > processed_chunks;
        if truncated {
            warn!(
                document_id = %document.id,
                total_chunks,
                processed_chunks,
                "document truncated to chunk limit"
            );
        }

        let vectors = self.batcher().embed(&texts).await?;

        if settings.replace_existing {
            let removed = self
                .vectors
                .delete_document_chunks(&document.id, &document.user_id)
                .await?;
            if removed > 0 {
                info!(document_id = %document.id, removed, "replaced chunks from earlier run");
            }
        }

        let processed_at = Utc::now();
        let chunks: Vec<VectorChunk> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (text, embedding))| {
                let index = index as u64;
                VectorChunk {
                    id: make_chunk_id(&document.id, &run, index, &text),
                    document_id: Some(document.id.clone()),
                    user_id: document.user_id.clone(),
                    thread_id: document.thread_id.clone(),
                    chunk_index: index,
                    metadata: ChunkMetadata {
                        source: SourceMetadata::Document {
                            document_id: document.id.clone(),
                            document_title: document.title.clone(),
                            file_name: document.file_name.clone(),
                            file_type: document.file_type.clone(),
                        },
                        chunk_index: index,
                        chunk_size: text.chars().count(),
                        processing_timestamp: processed_at,
                        total_chunks,
                        processed_chunks,
                        ingestion_run: Some(run),
                        extra: BTreeMap::new(),
                    },
                    content: text,
                    embedding,
                    created_at: processed_at,
                }
            })
            .collect();

        let inserted = self
            .writer(&settings.writer)
            .write_chunks(&chunks)
            .await
            .map_err(write_failure)?;

        let message = if truncated {
            format!(
                "Vectorized document into {processed_chunks} chunks ({inserted} inserted); truncated from {total_chunks}"
            )
        } else {
            format!("Vectorized document into {processed_chunks} chunks ({inserted} inserted)")
        };

        Ok(IngestionReport {
            success: true,
            message,
            vector_count: inserted,
            processed_chunks,
            total_chunks,
            truncated,
            ingestion_run: run,
            elapsed_ms: 0,
        })
    }

    pub async fn ingest_chat_history(
        &self,
        thread_id: &str,
        user_id: &str,
        options: &IngestionOptions,
    ) -> Result<IngestionReport, RagError> {
        let started = Instant::now();
        let run = Uuid::new_v4();
        self.records
            .thread(thread_id, user_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("thread {thread_id}")))?;

        let settings = self.settings(options, self.config.ingestion.max_chunks_per_chat_history)?;
        let turns = self.records.conversations(thread_id, user_id).await?;
        if turns.is_empty() {
            info!(thread_id, "no chat history to vectorize");
            return Ok(empty_report("No chat history found for thread", run, started));
        }

        let mut groups = build_chat_groups(
            &turns,
            Duration::minutes(self.config.ingestion.chat_idle_gap_minutes),
            self.config.ingestion.min_chat_group_chars,
        );
        if groups.is_empty() {
            info!(thread_id, turns = turns.len(), "chat history too short to vectorize");
            return Ok(empty_report("No meaningful chat content to vectorize", run, started));
        }

        let total_chunks = groups.len();
        groups.truncate(settings.max_chunks);
        let processed_chunks = groups.len();
        let truncated = total_chunks > processed_chunks;
        if truncated {
            warn!(thread_id, total_chunks, processed_chunks, "chat history truncated to chunk limit");
        }

        let texts: Vec<String> = groups.iter().map(|group| group.content.clone()).collect();
        let vectors = self.batcher().embed(&texts).await?;

        if settings.replace_existing {
            self.vectors
                .delete_chat_history_chunks(thread_id, user_id)
                .await?;
        }

        let processed_at = Utc::now();
        let mut turn_ids = Vec::new();
        let chunks: Vec<VectorChunk> = groups
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (group, embedding))| {
                let index = index as u64;
                turn_ids.extend(group.turn_ids);
                VectorChunk {
                    id: make_chunk_id(thread_id, &run, index, &group.content),
                    document_id: None,
                    user_id: user_id.to_string(),
                    thread_id: Some(thread_id.to_string()),
                    chunk_index: index,
                    metadata: ChunkMetadata {
                        source: SourceMetadata::ChatHistory {
                            thread_id: thread_id.to_string(),
                            conversation_count: group.conversation_count,
                            date_range: group.date_range,
                            group_index: group.group_index,
                            roles: group.roles,
                            fallback: false,
                            exchange_turn_id: None,
                        },
                        chunk_index: index,
                        chunk_size: group.content.chars().count(),
                        processing_timestamp: processed_at,
                        total_chunks,
                        processed_chunks,
                        ingestion_run: Some(run),
                        extra: BTreeMap::new(),
                    },
                    content: group.content,
                    embedding,
                    created_at: processed_at,
                }
            })
            .collect();

        let inserted = self
            .writer(&settings.writer)
            .write_chunks(&chunks)
            .await
            .map_err(write_failure)?;

        if let Err(error) = self.records.mark_vectorized(&turn_ids).await {
            warn!(thread_id, error = %error, "could not flag vectorized turns");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            thread_id,
            conversations = turns.len(),
            processed_chunks,
            total_chunks,
            elapsed_ms,
            "chat history vectorization completed"
        );

        Ok(IngestionReport {
            success: true,
            message: format!(
                "Vectorized chat history into {processed_chunks} chunks ({inserted} inserted)"
            ),
            vector_count: inserted,
            processed_chunks,
            total_chunks,
            truncated,
            ingestion_run: run,
            elapsed_ms,
        })
    }

    pub async fn ingest_exchange(
        &self,
        question: &ConversationTurn,
        answer: &ConversationTurn,
    ) -> Result<String, RagError> {
        let run = Uuid::new_v4();
        let content = render_exchange(&question.content, &answer.content);
        let mut vectors = self.batcher().embed(std::slice::from_ref(&content)).await?;
        let embedding = vectors.pop().ok_or_else(|| RagError::EmbeddingBatchFailed {
            batch_index: 0,
            total_batches: 1,
            details: "provider returned no vector".to_string(),
        })?;

        let processed_at = Utc::now();
        let chunk = VectorChunk {
            id: make_chunk_id(&question.thread_id, &run, 0, &content),
            document_id: None,
            user_id: question.user_id.clone(),
            thread_id: Some(question.thread_id.clone()),
            chunk_index: 0,
            metadata: ChunkMetadata {
                source: SourceMetadata::ChatHistory {
                    thread_id: question.thread_id.clone(),
                    conversation_count: 2,
                    date_range: exchange_range(question.created_at, answer.created_at),
                    group_index: 0,
                    roles: vec![Role::User, Role::Assistant],
                    fallback: true,
                    exchange_turn_id: Some(question.id.clone()),
                },
                chunk_index: 0,
                chunk_size: content.chars().count(),
                processing_timestamp: processed_at,
                total_chunks: 1,
                processed_chunks: 1,
                ingestion_run: Some(run),
                extra: BTreeMap::new(),
            },
            content,
            embedding,
            created_at: processed_at,
        };

        self.writer(&self.config.writer)
            .write_chunks(std::slice::from_ref(&chunk))
            .await
            .map_err(write_failure)?;
        self.records
            .mark_vectorized(&[question.id.clone(), answer.id.clone()])
            .await?;

        Ok(chunk.id)
    }

    fn batcher(&self) -> EmbeddingBatcher<'_, E> {
        EmbeddingBatcher::new(self.embedder, self.pacer, self.config.embedding.clone())
    }

    fn writer(&self, config: &WriterConfig) -> VectorStoreWriter<'_, V> {
        VectorStoreWriter::new(self.vectors, self.pacer, config.clone())
    }
}

fn write_failure(failure: PartialWrite) -> RagError {
    RagError::StoreWriteFailed {
        inserted: failure.inserted,
        total: failure.total,
        details: failure.source.to_string(),
    }
}

fn empty_report(message: &str, run: Uuid, started: Instant) -> IngestionReport {
    IngestionReport {
        success: true,
        message: message.to_string(),
        vector_count: 0,
        processed_chunks: 0,
        total_chunks: 0,
        truncated: false,
        ingestion_run: run,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn exchange_range(first: DateTime<Utc>, second: DateTime<Utc>) -> DateRange {
    DateRange {
        start: first.min(second),
        end: first.max(second),
    }
}

pub(crate) fn make_chunk_id(scope: &str, run: &Uuid, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(run.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
