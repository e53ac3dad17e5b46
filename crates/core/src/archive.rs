use crate::batching::EmbeddingBatcher;
use crate::config::RagConfig;
use crate::ingest::make_chunk_id;
use crate::models::{
    ChunkMetadata, ConversationTurn, DateRange, DeletionReport, SourceMetadata, Thread,
    ThreadStatus, VectorChunk,
};
use crate::traits::{EmbeddingModel, Pacer, RecordStore, VectorStore};
use crate::writer::VectorStoreWriter;
use crate::RagError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{error, info};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    pub archived_conversations: usize,
    pub chunk_id: Option<String>,
}

pub fn render_archive(thread: &Thread, turns: &[ConversationTurn]) -> String {
    let mut lines = vec![
        format!("THREAD ARCHIVE: {}", thread.title),
        format!("Created: {}", format_timestamp(thread.created_at)),
        format!("Last Activity: {}", format_timestamp(thread.last_activity_at)),
        format!("Total Conversations: {}", turns.len()),
        format!("Thread Status: {}", thread.status.as_str()),
        String::new(),
        "CONVERSATION HISTORY:".to_string(),
        "=".repeat(20),
    ];
    lines.extend(turns.iter().enumerate().map(|(index, turn)| {
        format!(
            "[{}] {} ({}): {}",
            index + 1,
            turn.role.as_str().to_uppercase(),
            format_timestamp(turn.created_at),
            turn.content
        )
    }));
    lines.join("\n")
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub struct ArchivalEngine<'a, R: ?Sized, V: ?Sized, E: ?Sized> {
    records: &'a R,
    vectors: &'a V,
    embedder: &'a E,
    pacer: &'a dyn Pacer,
    config: &'a RagConfig,
}

impl<'a, R, V, E> ArchivalEngine<'a, R, V, E>
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

    pub async fn archive_thread(&self, thread: &Thread) -> Result<ArchiveOutcome, RagError> {
        let turns = self.records.conversations(&thread.id, &thread.user_id).await?;
        if turns.is_empty() {
            info!(thread_id = %thread.id, "thread has no conversations to archive");
            return Ok(ArchiveOutcome {
                archived_conversations: 0,
                chunk_id: None,
            });
        }

        let content = render_archive(thread, &turns);
        let batcher =
            EmbeddingBatcher::new(self.embedder, self.pacer, self.config.embedding.clone());
        let embedding = batcher
            .embed(std::slice::from_ref(&content))
            .await?
            .pop()
            .ok_or_else(|| RagError::EmbeddingBatchFailed {
                batch_index: 0,
                total_batches: 1,
                details: "provider returned no vector".to_string(),
            })?;

        let run = Uuid::new_v4();
        let archived_at = Utc::now();
        let chunk = VectorChunk {
            id: make_chunk_id(&thread.id, &run, 0, &content),
            document_id: None,
            user_id: thread.user_id.clone(),
            thread_id: None,
            chunk_index: 0,
            metadata: ChunkMetadata {
                source: SourceMetadata::ThreadArchive {
                    thread_id: thread.id.clone(),
                    thread_title: thread.title.clone(),
                    conversation_count: turns.len(),
                    archive_date: archived_at,
                    date_range: DateRange {
                        start: thread.created_at,
                        end: thread.last_activity_at,
                    },
                    original_status: thread.status,
                },
                chunk_index: 0,
                chunk_size: content.chars().count(),
                processing_timestamp: archived_at,
                total_chunks: 1,
                processed_chunks: 1,
                ingestion_run: Some(run),
                extra: BTreeMap::new(),
            },
            content,
            embedding,
            created_at: archived_at,
        };

        VectorStoreWriter::new(self.vectors, self.pacer, self.config.writer.clone())
            .write_chunks(std::slice::from_ref(&chunk))
            .await
            .map_err(|failure| RagError::StoreWriteFailed {
                inserted: failure.inserted,
                total: failure.total,
                details: failure.source.to_string(),
            })?;

        info!(
            thread_id = %thread.id,
            conversations = turns.len(),
            chunk_id = %chunk.id,
            "thread archived"
        );
        Ok(ArchiveOutcome {
            archived_conversations: turns.len(),
            chunk_id: Some(chunk.id),
        })
    }

    // An archived thread still present means an earlier cascade failed after
    // its archive chunk was written.
    async fn existing_archive(&self, thread: &Thread) -> Result<Option<ArchiveOutcome>, RagError> {
        if thread.status != ThreadStatus::Archived {
            return Ok(None);
        }
        let chunk = self.vectors.archive_chunk(&thread.id, &thread.user_id).await?;
        Ok(chunk.map(|chunk| {
            let archived_conversations = match &chunk.metadata.source {
                SourceMetadata::ThreadArchive {
                    conversation_count, ..
                } => *conversation_count,
                _ => 0,
            };
            ArchiveOutcome {
                archived_conversations,
                chunk_id: Some(chunk.id),
            }
        }))
    }

    pub async fn delete_thread_with_archive(
        &self,
        thread_id: &str,
        user_id: &str,
        confirmed: bool,
    ) -> Result<DeletionReport, RagError> {
        let thread = self
            .records
            .thread(thread_id, user_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("thread {thread_id}")))?;

        if !confirmed {
            return Err(RagError::Validation(format!(
                "deleting thread \"{}\" requires explicit confirmation",
                thread.title
            )));
        }

        let outcome = match self.existing_archive(&thread).await? {
            Some(outcome) => {
                info!(thread_id, "reusing archive from an earlier attempt");
                outcome
            }
            None => self.archive_thread(&thread).await.map_err(|source| {
                error!(thread_id, error = %source, "archival failed, thread left in place");
                source
            })?,
        };

        self.records
            .set_thread_status(thread_id, user_id, ThreadStatus::Archived)
            .await?;
        self.records.delete_thread_cascade(thread_id, user_id).await?;

        info!(
            thread_id,
            archived_conversations = outcome.archived_conversations,
            "thread deleted"
        );
        Ok(DeletionReport {
            success: true,
            message: format!(
                "Thread \"{}\" deleted; {} conversations archived",
                thread.title, outcome.archived_conversations
            ),
            thread_id: thread_id.to_string(),
            archived_conversations: outcome.archived_conversations,
            archive_chunk_id: outcome.chunk_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Role, SourceType};
    use crate::pacing::NoPacer;
    use crate::stores::memory::tests::thread;
    use crate::stores::InMemoryStore;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 9, minute, 0).unwrap()
    }

    fn seeded_with_turns(count: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut owned = thread("t-1", "u-1", at(30));
        owned.created_at = at(0);
        owned.title = "Pump rebuild".to_string();
        store.put_thread(owned);
        for index in 0..count {
            store.put_conversation(ConversationTurn {
                id: format!("c-{index}"),
                thread_id: "t-1".to_string(),
                user_id: "u-1".to_string(),
                role: if index % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("message {index}"),
                created_at: at(index as u32 + 1),
                vectorized: false,
            });
        }
        store
    }

    #[test]
    fn archive_text_lists_header_then_turns() {
        let store = seeded_with_turns(0);
        let owned = store.stored_thread("t-1").unwrap();
        let turns = vec![ConversationTurn {
            id: "c-0".to_string(),
            thread_id: "t-1".to_string(),
            user_id: "u-1".to_string(),
            role: Role::Assistant,
            content: "Replace the seal.".to_string(),
            created_at: at(5),
            vectorized: false,
        }];

        let text = render_archive(&owned, &turns);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "THREAD ARCHIVE: Pump rebuild");
        assert_eq!(lines[1], "Created: 2024-06-02 09:00:00 UTC");
        assert_eq!(lines[3], "Total Conversations: 1");
        assert_eq!(lines[4], "Thread Status: active");
        assert_eq!(lines[6], "CONVERSATION HISTORY:");
        assert_eq!(lines[8], "[1] ASSISTANT (2024-06-02 09:05:00 UTC): Replace the seal.");
    }

    #[tokio::test]
    async fn archive_is_written_before_cascade() {
        let store = seeded_with_turns(3);
        let config = RagConfig::default();
        let embedder = CharacterNgramEmbedder::default();
        let engine = ArchivalEngine::new(&store, &store, &embedder, &NoPacer, &config);

        let report = engine
            .delete_thread_with_archive("t-1", "u-1", true)
            .await
            .unwrap();

        assert_eq!(report.archived_conversations, 3);
        let chunks = store.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_type(), SourceType::ThreadArchive);
        assert!(chunks[0].thread_id.is_none());
        assert_eq!(report.archive_chunk_id.as_deref(), Some(chunks[0].id.as_str()));
        match &chunks[0].metadata.source {
            SourceMetadata::ThreadArchive {
                thread_id,
                conversation_count,
                original_status,
                date_range,
                ..
            } => {
                assert_eq!(thread_id, "t-1");
                assert_eq!(*conversation_count, 3);
                assert_eq!(*original_status, ThreadStatus::Active);
                assert_eq!(date_range.start, at(0));
                assert_eq!(date_range.end, at(30));
            }
            other => panic!("unexpected metadata: {other:?}"),
        }

        assert_eq!(
            store.operations(),
            vec![
                "insert_chunks:1".to_string(),
                "set_thread_status:archived".to_string(),
                "delete_thread_cascade:t-1".to_string(),
            ]
        );
        assert!(store.stored_thread("t-1").is_none());
        assert!(store.stored_conversations("t-1").is_empty());
    }

    #[tokio::test]
    async fn failed_archive_blocks_the_cascade() {
        let store = seeded_with_turns(3);
        store.fail_insert_batch(0);
        let config = RagConfig::default();
        let embedder = CharacterNgramEmbedder::default();
        let engine = ArchivalEngine::new(&store, &store, &embedder, &NoPacer, &config);

        let result = engine.delete_thread_with_archive("t-1", "u-1", true).await;

        assert!(matches!(result, Err(RagError::StoreWriteFailed { inserted: 0, total: 1, .. })));
        assert!(!store
            .operations()
            .iter()
            .any(|operation| operation.starts_with("delete_thread_cascade")));
        assert!(store.stored_thread("t-1").is_some());
        assert_eq!(store.stored_conversations("t-1").len(), 3);
    }

    #[tokio::test]
    async fn retry_after_failed_cascade_reuses_archive() {
        let store = seeded_with_turns(3);
        store.fail_cascade();
        let config = RagConfig::default();
        let embedder = CharacterNgramEmbedder::default();
        let engine = ArchivalEngine::new(&store, &store, &embedder, &NoPacer, &config);

        let first = engine.delete_thread_with_archive("t-1", "u-1", true).await;
        assert!(matches!(first, Err(RagError::Store(_))));
        assert_eq!(
            store.stored_thread("t-1").map(|thread| thread.status),
            Some(ThreadStatus::Archived)
        );
        let archive_id = store.chunks()[0].id.clone();

        let report = engine
            .delete_thread_with_archive("t-1", "u-1", true)
            .await
            .unwrap();

        let archives: Vec<_> = store
            .chunks()
            .into_iter()
            .filter(|chunk| chunk.source_type() == SourceType::ThreadArchive)
            .collect();
        assert_eq!(archives.len(), 1);
        assert_eq!(report.archive_chunk_id.as_deref(), Some(archive_id.as_str()));
        assert_eq!(report.archived_conversations, 3);
        assert!(store.stored_thread("t-1").is_none());
        assert_eq!(
            store
                .operations()
                .iter()
                .filter(|operation| operation.starts_with("insert_chunks"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn empty_thread_is_deleted_without_archive() {
        let store = seeded_with_turns(0);
        let config = RagConfig::default();
        let embedder = CharacterNgramEmbedder::default();
        let engine = ArchivalEngine::new(&store, &store, &embedder, &NoPacer, &config);

        let report = engine
            .delete_thread_with_archive("t-1", "u-1", true)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.archived_conversations, 0);
        assert!(report.archive_chunk_id.is_none());
        assert_eq!(store.chunk_count(), 0);
        assert!(store.stored_thread("t-1").is_none());
    }

    #[tokio::test]
    async fn unconfirmed_or_foreign_deletes_are_refused() {
        let store = seeded_with_turns(2);
        let config = RagConfig::default();
        let embedder = CharacterNgramEmbedder::default();
        let engine = ArchivalEngine::new(&store, &store, &embedder, &NoPacer, &config);

        match engine.delete_thread_with_archive("t-1", "u-1", false).await {
            Err(RagError::Validation(message)) => assert!(message.contains("Pump rebuild")),
            other => panic!("unexpected result: {other:?}"),
        }

        let foreign = engine.delete_thread_with_archive("t-1", "u-2", false).await;
        assert!(matches!(foreign, Err(RagError::NotFound(_))));
        assert!(store.operations().is_empty());
    }
}
