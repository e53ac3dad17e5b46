use crate::models::{RetrievalOptions, ScoredChunk, SourceType, VectorChunk};
use crate::traits::{ChunkScope, EmbeddingModel, RecordStore, VectorStore};
use crate::RagError;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const CURRENT_THREAD_THRESHOLD: f32 = 0.7;
pub const CROSS_THREAD_THRESHOLD: f32 = 0.8;

pub const DOCUMENT_WEIGHT: f32 = 1.0;
pub const THREAD_ARCHIVE_WEIGHT: f32 = 0.9;
pub const CHAT_HISTORY_WEIGHT: f32 = 0.8;

pub const CURRENT_THREAD_WEIGHT: f32 = 1.0;
pub const CROSS_THREAD_WEIGHT: f32 = 0.9;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

pub fn source_weight(source_type: SourceType) -> f32 {
    match source_type {
        SourceType::Document => DOCUMENT_WEIGHT,
        SourceType::ThreadArchive => THREAD_ARCHIVE_WEIGHT,
        SourceType::ChatHistory => CHAT_HISTORY_WEIGHT,
    }
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub chunks: Vec<ScoredChunk>,
    pub threads_searched: usize,
    pub candidates_seen: usize,
    pub elapsed_ms: u64,
}

pub struct RetrievalEngine<'a, R: ?Sized, V: ?Sized, E: ?Sized> {
    records: &'a R,
    vectors: &'a V,
    embedder: &'a E,
}

impl<'a, R, V, E> RetrievalEngine<'a, R, V, E>
where
    R: RecordStore + ?Sized,
    V: VectorStore + ?Sized,
    E: EmbeddingModel + ?Sized,
{
    pub fn new(records: &'a R, vectors: &'a V, embedder: &'a E) -> Self {
        Self {
            records,
            vectors,
            embedder,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        current_thread_id: &str,
        user_id: &str,
        options: &RetrievalOptions,
    ) -> Result<Retrieval, RagError> {
        let started = Instant::now();
        let query_vector = self.embedder.embed_query(query).await.map_err(|source| {
            RagError::EmbeddingBatchFailed {
                batch_index: 0,
                total_batches: 1,
                details: source.to_string(),
            }
        })?;

        let mut scopes = self
            .candidate_threads(current_thread_id, user_id, options)
            .await?
            .into_iter()
            .map(ChunkScope::Thread)
            .collect::<Vec<_>>();
        if options.cross_thread_search {
            scopes.push(ChunkScope::Archives);
        }

        let fetch_limit = options.top_k_per_thread.max(1) * 2;
        let mut per_scope = Vec::with_capacity(scopes.len());
        let mut candidates_seen = 0usize;

        for scope in &scopes {
            let fetched = match self
                .vectors
                .nearest_chunks(
                    user_id,
                    scope,
                    &query_vector,
                    fetch_limit,
                    options.include_chat_history,
                )
                .await
            {
                Ok(fetched) => fetched,
                Err(error) => {
                    warn!(scope = ?scope, error = %error, "similarity search failed for scope");
                    continue;
                }
            };

            candidates_seen += fetched.len();
            let is_current =
                matches!(scope, ChunkScope::Thread(thread_id) if thread_id == current_thread_id);
            let selected = select_top_k(
                fetched,
                &query_vector,
                is_current,
                options.top_k_per_thread,
            );
            debug!(scope = ?scope, selected = selected.len(), "scope searched");
            per_scope.push(selected);
        }

        let chunks = merge_ranked(per_scope, options);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            threads_searched = scopes.len(),
            candidates_seen,
            results = chunks.len(),
            current_thread_results = chunks.iter().filter(|chunk| chunk.is_current_thread).count(),
            elapsed_ms,
            "similarity search completed"
        );

        Ok(Retrieval {
            chunks,
            threads_searched: scopes.len(),
            candidates_seen,
            elapsed_ms,
        })
    }

    async fn candidate_threads(
        &self,
        current_thread_id: &str,
        user_id: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<String>, RagError> {
        if !options.cross_thread_search {
            return match self.records.thread(current_thread_id, user_id).await? {
                Some(thread) => Ok(vec![thread.id]),
                None => Err(RagError::NotFound(format!("thread {current_thread_id}"))),
            };
        }

        let limit = options.max_threads_search.max(1);
        let recent = self.records.recent_threads(user_id, limit).await?;
        let mut ids: Vec<String> = Vec::with_capacity(limit);

        let current_listed = recent.iter().any(|thread| thread.id == current_thread_id);
        if current_listed || self.records.thread(current_thread_id, user_id).await?.is_some() {
            ids.push(current_thread_id.to_string());
        }
        ids.extend(
            recent
                .into_iter()
                .map(|thread| thread.id)
                .filter(|id| id != current_thread_id),
        );
        ids.truncate(limit);
        Ok(ids)
    }
}

pub fn select_top_k(
    chunks: Vec<VectorChunk>,
    query_vector: &[f32],
    is_current_thread: bool,
    top_k: usize,
) -> Vec<ScoredChunk> {
    let threshold = if is_current_thread {
        CURRENT_THREAD_THRESHOLD
    } else {
        CROSS_THREAD_THRESHOLD
    };

    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .filter_map(|chunk| {
            let similarity = cosine_similarity(query_vector, &chunk.embedding);
            if similarity < threshold {
                return None;
            }
            let source_type = chunk.source_type();
            let weight = source_weight(source_type);
            Some(ScoredChunk {
                thread_id: chunk.origin_thread_id().map(str::to_string),
                source_type,
                similarity,
                source_weight: weight,
                thread_weight: 1.0,
                final_score: similarity * weight,
                is_current_thread,
                chunk,
            })
        })
        .collect();

    scored.sort_by(|left, right| right.final_score.total_cmp(&left.final_score));
    scored.truncate(top_k);
    scored
}

/// Ties keep fetch order, so the current thread wins them.
pub fn merge_ranked(per_scope: Vec<Vec<ScoredChunk>>, options: &RetrievalOptions) -> Vec<ScoredChunk> {
    let mut merged: Vec<ScoredChunk> = per_scope
        .into_iter()
        .flatten()
        .map(|mut chunk| {
            chunk.thread_weight = if chunk.is_current_thread && options.current_thread_priority {
                CURRENT_THREAD_WEIGHT
            } else {
                CROSS_THREAD_WEIGHT
            };
            chunk.final_score = chunk.similarity * chunk.source_weight * chunk.thread_weight;
            chunk
        })
        .collect();

    merged.sort_by(|left, right| right.final_score.total_cmp(&left.final_score));
    merged.truncate(options.max_results);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{DateRange, Role, SourceMetadata};
    use crate::stores::memory::tests::{document_chunk, thread};
    use crate::stores::InMemoryStore;
    use crate::traits::EmbeddingModel;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    struct FixedQuery(Vec<f32>);

    #[async_trait]
    impl EmbeddingModel for FixedQuery {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, crate::StoreError> {
            Ok(self.0.clone())
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::StoreError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn at_similarity(similarity: f32) -> Vec<f32> {
        vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
    }

    fn chat_chunk(user_id: &str, thread_id: &str, index: u64, embedding: Vec<f32>) -> VectorChunk {
        let mut chunk = document_chunk(user_id, thread_id, "unused", index, embedding);
        chunk.id = format!("{thread_id}-chat-{index}");
        chunk.document_id = None;
        chunk.metadata.source = SourceMetadata::ChatHistory {
            thread_id: thread_id.to_string(),
            conversation_count: 2,
            date_range: DateRange {
                start: Utc::now(),
                end: Utc::now(),
            },
            group_index: index as usize,
            roles: vec![Role::User, Role::Assistant],
            fallback: false,
            exchange_turn_id: None,
        };
        chunk
    }

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.put_thread(thread("current", "u-1", now));
        store.put_thread(thread("other", "u-1", now - Duration::minutes(5)));
        store
    }

    #[test]
    fn cosine_similarity_properties() {
        let v = vec![0.3, -1.2, 4.0];
        let negated: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&v, &negated) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn source_weights_prefer_documents() {
        assert_eq!(source_weight(SourceType::Document), 1.0);
        assert_eq!(source_weight(SourceType::ThreadArchive), 0.9);
        assert_eq!(source_weight(SourceType::ChatHistory), 0.8);
    }

    #[test]
    fn top_k_applies_thresholds_per_thread_kind() {
        let query = vec![1.0, 0.0];
        let chunks = vec![
            document_chunk("u-1", "t", "d", 0, at_similarity(0.75)),
            document_chunk("u-1", "t", "d", 1, at_similarity(0.85)),
            document_chunk("u-1", "t", "d", 2, at_similarity(0.65)),
        ];

        let current = select_top_k(chunks.clone(), &query, true, 3);
        assert_eq!(current.len(), 2);

        let cross = select_top_k(chunks, &query, false, 3);
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].chunk.chunk_index, 1);
    }

    #[test]
    fn top_k_ranks_by_source_weighted_similarity() {
        let query = vec![1.0, 0.0];
        let chunks = vec![
            chat_chunk("u-1", "t", 0, at_similarity(0.95)),
            document_chunk("u-1", "t", "d", 0, at_similarity(0.90)),
        ];
        let selected = select_top_k(chunks, &query, true, 1);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].source_type, SourceType::Document);
    }

    #[tokio::test]
    async fn results_are_sorted_and_thresholded() {
        let store = seeded_store();
        store
            .insert_chunks(&[
                document_chunk("u-1", "current", "d-1", 0, at_similarity(0.72)),
                document_chunk("u-1", "current", "d-1", 1, at_similarity(0.90)),
                document_chunk("u-1", "current", "d-1", 2, at_similarity(0.50)),
                document_chunk("u-1", "other", "d-2", 0, at_similarity(0.79)),
                document_chunk("u-1", "other", "d-2", 1, at_similarity(0.99)),
                chat_chunk("u-1", "current", 0, at_similarity(0.97)),
            ])
            .await
            .unwrap();

        let embedder = FixedQuery(vec![1.0, 0.0]);
        let engine = RetrievalEngine::new(&store, &store, &embedder);
        let retrieval = engine
            .retrieve("anything", "current", "u-1", &RetrievalOptions::default())
            .await
            .unwrap();

        let scores: Vec<f32> = retrieval.chunks.iter().map(|chunk| chunk.final_score).collect();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
        for chunk in &retrieval.chunks {
            let threshold = if chunk.is_current_thread { 0.7 } else { 0.8 };
            assert!(chunk.similarity >= threshold - 1e-5);
        }
        let ids: Vec<&str> = retrieval.chunks.iter().map(|chunk| chunk.chunk.id.as_str()).collect();
        assert!(!ids.contains(&"d-1-2"));
        assert!(!ids.contains(&"d-2-0"));
        assert!(ids.contains(&"d-2-1"));
        assert_eq!(retrieval.chunks.len(), 4);
    }

    #[tokio::test]
    async fn current_thread_wins_ties_with_priority() {
        let store = seeded_store();
        store
            .insert_chunks(&[
                document_chunk("u-1", "other", "d-2", 0, at_similarity(0.9)),
                document_chunk("u-1", "current", "d-1", 0, at_similarity(0.9)),
            ])
            .await
            .unwrap();
        let embedder = FixedQuery(vec![1.0, 0.0]);
        let engine = RetrievalEngine::new(&store, &store, &embedder);

        let with_priority = engine
            .retrieve("q", "current", "u-1", &RetrievalOptions::default())
            .await
            .unwrap();
        assert!(with_priority.chunks[0].is_current_thread);
        assert_eq!(with_priority.chunks[0].thread_weight, 1.0);
        assert_eq!(with_priority.chunks[1].thread_weight, 0.9);

        let options = RetrievalOptions {
            current_thread_priority: false,
            ..RetrievalOptions::default()
        };
        let without_priority = engine.retrieve("q", "current", "u-1", &options).await.unwrap();
        assert_eq!(
            without_priority.chunks[0].final_score,
            without_priority.chunks[1].final_score
        );
        assert!(without_priority.chunks[0].is_current_thread);
    }

    #[tokio::test]
    async fn single_thread_mode_ignores_other_threads() {
        let store = seeded_store();
        store
            .insert_chunks(&[document_chunk("u-1", "other", "d-2", 0, at_similarity(0.99))])
            .await
            .unwrap();
        let embedder = FixedQuery(vec![1.0, 0.0]);
        let engine = RetrievalEngine::new(&store, &store, &embedder);
        let options = RetrievalOptions {
            cross_thread_search: false,
            ..RetrievalOptions::default()
        };

        let retrieval = engine.retrieve("q", "current", "u-1", &options).await.unwrap();
        assert!(retrieval.chunks.is_empty());
        assert_eq!(retrieval.threads_searched, 1);

        let missing = engine.retrieve("q", "nope", "u-1", &options).await;
        assert!(matches!(missing, Err(RagError::NotFound(_))));
    }

    #[tokio::test]
    async fn chat_history_can_be_excluded() {
        let store = seeded_store();
        store
            .insert_chunks(&[chat_chunk("u-1", "current", 0, at_similarity(0.99))])
            .await
            .unwrap();
        let embedder = FixedQuery(vec![1.0, 0.0]);
        let engine = RetrievalEngine::new(&store, &store, &embedder);
        let options = RetrievalOptions {
            include_chat_history: false,
            ..RetrievalOptions::default()
        };
        let retrieval = engine.retrieve("q", "current", "u-1", &options).await.unwrap();
        assert!(retrieval.chunks.is_empty());
    }

    #[tokio::test]
    async fn current_thread_is_searched_even_when_not_recent() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.put_thread(thread("stale", "u-1", now - Duration::days(30)));
        for index in 0..5 {
            store.put_thread(thread(&format!("recent-{index}"), "u-1", now - Duration::minutes(index)));
        }
        store
            .insert_chunks(&[document_chunk("u-1", "stale", "d-1", 0, at_similarity(0.75))])
            .await
            .unwrap();

        let embedder = FixedQuery(vec![1.0, 0.0]);
        let engine = RetrievalEngine::new(&store, &store, &embedder);
        let retrieval = engine
            .retrieve("q", "stale", "u-1", &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(retrieval.chunks.len(), 1);
        assert!(retrieval.chunks[0].is_current_thread);
        // five thread slots plus the archive scope
        assert_eq!(retrieval.threads_searched, 6);
    }

    #[tokio::test]
    async fn real_embedder_finds_matching_document() {
        let store = seeded_store();
        let embedder = CharacterNgramEmbedder::default();
        let text = "Hydraulic pump maintenance schedule for the north plant";
        let mut chunk = document_chunk("u-1", "current", "d-1", 0, embedder.embed(text));
        chunk.content = text.to_string();
        store.insert_chunks(&[chunk]).await.unwrap();

        let engine = RetrievalEngine::new(&store, &store, &embedder);
        let retrieval = engine
            .retrieve(text, "current", "u-1", &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(retrieval.chunks.len(), 1);
        assert!((retrieval.chunks[0].similarity - 1.0).abs() < 1e-5);
    }
}
