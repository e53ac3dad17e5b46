use crate::answer::AnswerGenerator;
use crate::archive::ArchivalEngine;
use crate::config::RagConfig;
use crate::ingest::IngestionOrchestrator;
use crate::models::{DeletionReport, IngestionOptions, IngestionReport, QueryOptions, QueryResponse};
use crate::pacing::SleepPacer;
use crate::traits::{
    EmbeddingModel, IdentityProvider, Pacer, RecordStore, TextGenerator, VectorStore,
};
use crate::RagError;
use tracing::warn;

pub struct RagService<S, E, G> {
    store: S,
    embedder: E,
    generator: G,
    pacer: Box<dyn Pacer>,
    identity: Option<Box<dyn IdentityProvider>>,
    config: RagConfig,
}

impl<S, E, G> RagService<S, E, G>
where
    S: RecordStore + VectorStore,
    E: EmbeddingModel,
    G: TextGenerator,
{
    pub fn new(store: S, embedder: E, generator: G, config: RagConfig) -> Self {
        Self {
            store,
            embedder,
            generator,
            pacer: Box::new(SleepPacer),
            identity: None,
            config,
        }
    }

    pub fn with_pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    pub fn with_identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Box::new(identity));
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn verify_caller(&self, bearer: &str, user_id: &str) -> Result<(), RagError> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            RagError::Unauthorized("no identity provider configured".to_string())
        })?;
        let authenticated = identity.authenticate(bearer).await.map_err(|error| {
            warn!(error = %error, "bearer credential rejected");
            RagError::Unauthorized("invalid or expired credential".to_string())
        })?;
        if authenticated != user_id {
            return Err(RagError::Unauthorized(
                "credential does not belong to the requested user".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn ingest_document(
        &self,
        document_id: &str,
        user_id: &str,
        options: &IngestionOptions,
    ) -> Result<IngestionReport, RagError> {
        self.ingestion()
            .ingest_document(document_id, user_id, options)
            .await
    }

    pub async fn ingest_chat_history(
        &self,
        thread_id: &str,
        user_id: &str,
        options: &IngestionOptions,
    ) -> Result<IngestionReport, RagError> {
        self.ingestion()
            .ingest_chat_history(thread_id, user_id, options)
            .await
    }

    pub async fn query(
        &self,
        thread_id: &str,
        user_id: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse, RagError> {
        AnswerGenerator::new(
            &self.store,
            &self.store,
            &self.embedder,
            &self.generator,
            &*self.pacer,
            &self.config,
        )
        .query(thread_id, user_id, query, options)
        .await
    }

    pub async fn delete_thread_with_archive(
        &self,
        thread_id: &str,
        user_id: &str,
        confirmed: bool,
    ) -> Result<DeletionReport, RagError> {
        ArchivalEngine::new(
            &self.store,
            &self.store,
            &self.embedder,
            &*self.pacer,
            &self.config,
        )
        .delete_thread_with_archive(thread_id, user_id, confirmed)
        .await
    }

    fn ingestion(&self) -> IngestionOrchestrator<'_, S, S, E> {
        IngestionOrchestrator::new(
            &self.store,
            &self.store,
            &self.embedder,
            &*self.pacer,
            &self.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::tests::ScriptedGenerator;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{ConversationTurn, Role, SourceType};
    use crate::pacing::NoPacer;
    use crate::stores::memory::tests::thread;
    use crate::stores::InMemoryStore;
    use crate::StoreError;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    struct StaticIdentity;

    #[async_trait]
    impl IdentityProvider for StaticIdentity {
        async fn authenticate(&self, bearer: &str) -> Result<String, StoreError> {
            match bearer {
                "token-u1" => Ok("u-1".to_string()),
                _ => Err(StoreError::BackendResponse {
                    backend: "auth".to_string(),
                    details: "401".to_string(),
                }),
            }
        }
    }

    fn service(reply: &str) -> RagService<InMemoryStore, CharacterNgramEmbedder, ScriptedGenerator> {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.put_thread(thread("t-1", "u-1", now - Duration::minutes(10)));
        store.put_thread(thread("t-2", "u-1", now - Duration::minutes(20)));
        RagService::new(
            store,
            CharacterNgramEmbedder::default(),
            ScriptedGenerator::new(reply),
            RagConfig::default(),
        )
        .with_pacer(NoPacer)
        .with_identity(StaticIdentity)
    }

    #[tokio::test]
    async fn fallback_answer_becomes_retrievable_context() {
        let service = service("Quantum foam describes fluctuations of spacetime.");

        let first = service
            .query("t-1", "u-1", "define quantum foam", &QueryOptions::default())
            .await
            .unwrap();
        assert!(first.fallback_generated);
        assert!(first.sources.is_empty());

        let chunks = service.store().chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_type(), SourceType::ChatHistory);
        assert_eq!(service.store().stored_conversations("t-1").len(), 2);
    }

    #[tokio::test]
    async fn deleted_thread_survives_as_cross_thread_archive() {
        let service = service("The seal kit is part 7-114.");
        let base = Utc::now() - Duration::hours(2);
        for (index, (role, content)) in [
            (Role::User, "Which seal kit fits the P-200 pump?"),
            (Role::Assistant, "The seal kit is part 7-114."),
            (Role::User, "Thanks, ordering it now."),
        ]
        .into_iter()
        .enumerate()
        {
            service.store().put_conversation(ConversationTurn {
                id: format!("c-{index}"),
                thread_id: "t-2".to_string(),
                user_id: "u-1".to_string(),
                role,
                content: content.to_string(),
                created_at: base + Duration::minutes(index as i64),
                vectorized: false,
            });
        }

        let report = service
            .delete_thread_with_archive("t-2", "u-1", true)
            .await
            .unwrap();
        assert_eq!(report.archived_conversations, 3);

        let operations = service.store().operations();
        let insert = operations.iter().position(|op| op == "insert_chunks:1");
        let cascade = operations.iter().position(|op| op == "delete_thread_cascade:t-2");
        assert!(insert.is_some() && insert < cascade);

        let archive = service.store().chunks().remove(0);
        service
            .store()
            .put_thread(thread("t-3", "u-1", Utc::now()));
        let mut config = service.config().clone();
        config.retrieval.max_threads_search = 2;
        let store = service.store();
        let retrieval = crate::retrieval::RetrievalEngine::new(store, store, &CharacterNgramEmbedder::default())
            .retrieve(&archive.content, "t-3", "u-1", &config.retrieval)
            .await
            .unwrap();
        assert_eq!(retrieval.chunks.len(), 1);
        assert_eq!(retrieval.chunks[0].source_type, SourceType::ThreadArchive);
        assert_eq!(retrieval.chunks[0].thread_id.as_deref(), Some("t-2"));
    }

    #[tokio::test]
    async fn document_ingestion_then_grounded_query() {
        let service = service("The pump runs at 1450 rpm.");
        let now = Utc::now();
        service.store().put_document(crate::models::Document {
            id: "d-1".to_string(),
            thread_id: Some("t-1".to_string()),
            user_id: "u-1".to_string(),
            title: "P-200 datasheet".to_string(),
            file_path: "u-1/p200.txt".to_string(),
            file_name: "p200.txt".to_string(),
            file_type: "text/plain".to_string(),
            file_size: 30,
            content: Some("The P-200 pump runs at 1450 rpm.".to_string()),
            status: crate::models::DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        });

        let report = service
            .ingest_document("d-1", "u-1", &IngestionOptions::default())
            .await
            .unwrap();
        assert_eq!(report.vector_count, 1);

        let response = service
            .query("t-1", "u-1", "The P-200 pump runs at 1450 rpm.", &QueryOptions::default())
            .await
            .unwrap();
        assert!(!response.fallback_generated);
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].source_type, SourceType::Document);
    }

    #[tokio::test]
    async fn callers_must_match_their_credential() {
        let service = service("unused");
        assert!(service.verify_caller("token-u1", "u-1").await.is_ok());
        assert!(matches!(
            service.verify_caller("token-u1", "u-2").await,
            Err(RagError::Unauthorized(_))
        ));
        assert!(matches!(
            service.verify_caller("forged", "u-1").await,
            Err(RagError::Unauthorized(_))
        ));
    }
}
