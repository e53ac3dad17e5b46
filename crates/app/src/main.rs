use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use threadrag_core::{
    FailureReport, IngestionOptions, OpenAiClient, QueryOptions, RagConfig, RagError, RagService,
    RetrievalOptions, SupabaseStore,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "threadrag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Supabase service-role key
    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    supabase_key: String,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = threadrag_core::providers::openai::DEFAULT_BASE_URL)]
    openai_base_url: String,

    /// JSON file overriding pipeline defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Caller's access token; when set it must authenticate as --user-id
    #[arg(long, env = "THREADRAG_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Args)]
struct ChunkArgs {
    /// Characters per chunk
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Characters shared between consecutive chunks
    #[arg(long)]
    chunk_overlap: Option<usize>,
    /// Stop after this many chunks
    #[arg(long)]
    max_chunks: Option<usize>,
    /// Rows per insert request
    #[arg(long)]
    insert_batch_size: Option<usize>,
    /// Keep chunks from earlier runs instead of replacing them
    #[arg(long, default_value_t = false)]
    keep_existing: bool,
}

impl ChunkArgs {
    fn options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            max_chunks: self.max_chunks,
            insert_batch_size: self.insert_batch_size,
            replace_existing: self.keep_existing.then_some(false),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store one document.
    IngestDocument {
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        user_id: String,
        #[command(flatten)]
        chunking: ChunkArgs,
    },
    /// Embed a thread's conversation history.
    IngestChat {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        user_id: String,
        #[command(flatten)]
        chunking: ChunkArgs,
    },
    /// Answer a question in the context of a thread.
    Query {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        user_id: String,
        /// Question text
        #[arg(long)]
        text: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Maximum sources passed to the model
        #[arg(long)]
        max_results: Option<usize>,
        /// Search only the current thread
        #[arg(long, default_value_t = false)]
        single_thread: bool,
        /// Leave chat-history chunks out of the search
        #[arg(long, default_value_t = false)]
        no_chat_history: bool,
        /// Add thread title and activity to the prompt
        #[arg(long, default_value_t = false)]
        thread_context: bool,
    },
    /// Archive a thread's conversations, then delete the thread.
    DeleteThread {
        #[arg(long)]
        thread_id: String,
        #[arg(long)]
        user_id: String,
        /// Required; deletion is refused without it
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

impl Command {
    fn user_id(&self) -> &str {
        match self {
            Self::IngestDocument { user_id, .. }
            | Self::IngestChat { user_id, .. }
            | Self::Query { user_id, .. }
            | Self::DeleteThread { user_id, .. } => user_id,
        }
    }
}

fn emit<T: Serialize>(result: Result<T, RagError>) -> anyhow::Result<ExitCode> {
    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            warn!(error = %error, "operation failed");
            println!("{}", serde_json::to_string_pretty(&FailureReport::from(&error))?);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RagConfig::from_json_file(path)?,
        None => RagConfig::default(),
    };
    let store = SupabaseStore::new(&cli.supabase_url, cli.supabase_key.clone())?;
    let openai = OpenAiClient::with_base_url(&cli.openai_base_url, cli.openai_api_key.clone())?;
    let service = RagService::new(store.clone(), openai.clone(), openai, config)
        .with_identity(store);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "threadrag boot"
    );

    if let Some(token) = &cli.token {
        if let Err(error) = service.verify_caller(token, cli.command.user_id()).await {
            return emit::<()>(Err(error));
        }
    }

    match cli.command {
        Command::IngestDocument {
            document_id,
            user_id,
            chunking,
        } => emit(
            service
                .ingest_document(&document_id, &user_id, &chunking.options())
                .await,
        ),
        Command::IngestChat {
            thread_id,
            user_id,
            chunking,
        } => emit(
            service
                .ingest_chat_history(&thread_id, &user_id, &chunking.options())
                .await,
        ),
        Command::Query {
            thread_id,
            user_id,
            text,
            model,
            temperature,
            max_tokens,
            max_results,
            single_thread,
            no_chat_history,
            thread_context,
        } => {
            let defaults = service.config().retrieval.clone();
            let retrieval = RetrievalOptions {
                max_results: max_results.unwrap_or(defaults.max_results),
                cross_thread_search: defaults.cross_thread_search && !single_thread,
                include_chat_history: defaults.include_chat_history && !no_chat_history,
                ..defaults
            };
            let options = QueryOptions {
                retrieval: Some(retrieval),
                model,
                temperature,
                max_tokens,
                include_thread_context: thread_context,
            };
            emit(service.query(&thread_id, &user_id, &text, &options).await)
        }
        Command::DeleteThread {
            thread_id,
            user_id,
            confirm,
        } => emit(
            service
                .delete_thread_with_archive(&thread_id, &user_id, confirm)
                .await,
        ),
    }
}
