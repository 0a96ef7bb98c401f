//! Fleet query REST API server
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/fleet cargo run --bin fleet_server --features server
//!
//! curl -X POST http://localhost:3000/api/chat \
//!   -H "Content-Type: application/json" \
//!   -d '{"session_id": "demo", "message": "which plant does vehicle ABC-123 belong to?"}'
//!
//! curl http://localhost:3000/api/health
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleet_query::agentic::{create_llm_client, Encoder, LlmClient, OpenAiEncoder, SharedEncoder};
use fleet_query::api::create_chat_router;
use fleet_query::context::ConversationJournal;
use fleet_query::database::{
    DatabaseConfig, DatabaseManager, PgConversationJournal, PgEmbeddingStore, SchemaSource,
};
use fleet_query::schema::{EmbeddingStore, InMemoryEmbeddingStore, ReferenceDoc};
use fleet_query::{PipelineConfig, QueryPipeline, SchemaIndex, TableCatalogue};

#[derive(Debug, Parser)]
#[command(name = "fleet_server", about = "Natural-language query API for the fleet database")]
struct Args {
    /// Address to bind
    #[arg(long, env = "FLEET_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "FLEET_PORT", default_value_t = 3000)]
    port: u16,

    /// Run without an LLM: only template questions are answered
    #[arg(long)]
    no_llm: bool,

    /// Run without the embedding encoder: keyword table search only
    #[arg(long)]
    no_embeddings: bool,
}

fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleet_query=info,tower_http=info")),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .enable_all()
        .build()
        .context("building the tokio runtime")?
        .block_on(serve(args, config))
}

async fn serve(args: Args, config: PipelineConfig) -> anyhow::Result<()> {
    info!("Starting fleet query server");

    let db = DatabaseManager::new(DatabaseConfig::default())
        .await
        .context("connecting to the database")?;
    info!("Database ready: {}", db.pool_summary());

    let reference = ReferenceDoc::bundled().context("parsing the bundled schema reference")?;
    let tables = db
        .schema_source()
        .tables()
        .await
        .map_err(|e| anyhow::anyhow!(e.sanitized_message()))
        .context("introspecting the schema")?;
    let catalogue = if tables.is_empty() {
        warn!("Introspection found no tables, using the bundled reference only");
        TableCatalogue::from_reference(&reference)
    } else {
        TableCatalogue::build(tables, &reference)
    };
    info!(tables = catalogue.len(), "Table catalogue built");

    let encoder: Option<SharedEncoder> = if args.no_embeddings {
        None
    } else {
        match OpenAiEncoder::from_env(&config.embedding_model_name, config.embedding_dimension) {
            Ok(encoder) => {
                info!(model = encoder.model_name(), "Embedding encoder configured");
                Some(Arc::new(encoder))
            }
            Err(e) => {
                warn!("No embedding encoder, table search falls back to keywords: {}", e);
                None
            }
        }
    };

    let store: Arc<dyn EmbeddingStore> =
        match PgEmbeddingStore::connect(db.pool().clone(), config.embedding_dimension).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Embedding persistence unavailable, keeping vectors in memory: {}", e);
                Arc::new(InMemoryEmbeddingStore::new())
            }
        };

    let index = SchemaIndex::build(catalogue, encoder, store, config.encoder_timeout()).await;

    let llm: Option<Arc<dyn LlmClient>> = if args.no_llm {
        None
    } else {
        match create_llm_client() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("No LLM configured, only template questions will be answered: {}", e);
                None
            }
        }
    };

    let mut pipeline = QueryPipeline::new(config, Arc::new(index), llm, Arc::new(db.executor()));
    match PgConversationJournal::connect(db.pool().clone()).await {
        Ok(journal) => {
            let journal: Arc<dyn ConversationJournal> = Arc::new(journal);
            pipeline = pipeline.with_journal(journal);
        }
        Err(e) => warn!("Conversation history will not be persisted: {}", e),
    }

    let app = create_chat_router(Arc::new(pipeline))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("parsing the bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    info!("  POST http://{}/api/chat", addr);
    info!("  GET  http://{}/api/health", addr);

    axum::serve(listener, app).await?;
    db.close().await;
    Ok(())
}
