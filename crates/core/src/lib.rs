pub mod answer;
pub mod archive;
pub mod batching;
pub mod chunking;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pacing;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod service;
pub mod stores;
pub mod traits;
pub mod writer;

pub use answer::AnswerGenerator;
pub use archive::{render_archive, ArchivalEngine, ArchiveOutcome};
pub use batching::EmbeddingBatcher;
pub use chunking::{split_text, ChunkingConfig, TextSplitter};
pub use config::{
    EmbeddingBatchConfig, GenerationConfig, IngestionDefaults, RagConfig, WriterConfig,
};
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{FailureReport, RagError, StoreError};
pub use ingest::IngestionOrchestrator;
pub use models::{
    ChunkMetadata, ConversationTurn, DeletionReport, Document, DocumentStatus, IngestionOptions,
    IngestionReport, QueryOptions, QueryResponse, RetrievalOptions, Role, ScoredChunk,
    SourceMetadata, SourceType, Thread, ThreadStatus, VectorChunk,
};
pub use pacing::{NoPacer, RecordingPacer, SleepPacer};
pub use providers::OpenAiClient;
pub use retrieval::{cosine_similarity, Retrieval, RetrievalEngine};
pub use service::RagService;
pub use stores::{InMemoryStore, SupabaseStore};
pub use traits::{
    ChunkScope, EmbeddingModel, GenerationRequest, IdentityProvider, Pacer, RecordStore,
    TextGenerator, VectorStore,
};
pub use writer::{PartialWrite, VectorStoreWriter};
