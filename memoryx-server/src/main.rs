use anyhow::Result;
use axum::{
    Router,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoryx_server::AppState;
use memoryx_server::api;
use memoryx_server::core::auth::{ApiKeyVerifier, CachingApiKeyVerifier, RelationalKeyVerifier, api_key_middleware};
use memoryx_server::core::config::{QuotaConfig, Settings};
use memoryx_server::core::ingestion::aggregator::Aggregator;
use memoryx_server::core::ingestion::llm::{LlmClient, OpenAiCompatibleLlmClient};
use memoryx_server::core::ingestion::task::TaskQueue;
use memoryx_server::core::reconciler::drift_sweep::DriftSweep;
use memoryx_server::core::reconciler::llm_judge::{Judge, LlmJudge};
use memoryx_server::core::reconciler::reconciler::Reconciler;
use memoryx_server::core::retriever::Retriever;
use memoryx_server::core::tri_store::combined::TriStore;
use memoryx_server::core::tri_store::graph::{GraphConfig as Neo4jConfig, Neo4jEntityGraph};
use memoryx_server::core::tri_store::relational::SqliteRelationalStore;
use memoryx_server::core::tri_store::traits::RelationalStore;
use memoryx_server::core::tri_store::vector::{MeilisearchVectorIndex, VectorConfig as MeiliConfig};
use memoryx_server::middleware::{error_handler, request_id};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new()?;

    info!("Starting MemoryX server on {}:{}", settings.server.host, settings.server.port);

    let app = create_app(settings.clone()).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn create_app(settings: Settings) -> Result<Router> {
    let cors = CorsLayer::permissive();

    let relational: Arc<dyn RelationalStore> = Arc::new(
        SqliteRelationalStore::open(settings.relational.url.trim_start_matches("sqlite://"))?,
    );

    info!("connecting to vector store at {}", settings.vector.url);
    let vector = Arc::new(
        MeilisearchVectorIndex::connect(MeiliConfig {
            url: settings.vector.url.clone(),
            api_key: settings.vector.api_key.clone(),
        })
        .await?,
    );

    info!("connecting to entity graph at {}", settings.graph.uri);
    let graph = Arc::new(
        Neo4jEntityGraph::connect(Neo4jConfig {
            uri: settings.graph.uri.clone(),
            user: settings.graph.user.clone(),
            password: settings.graph.password.clone(),
        })
        .await?,
    );

    let tri_store = Arc::new(TriStore::new(relational.clone(), vector, graph));

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleLlmClient::new(
        settings.llm.base_url.clone(),
        settings.llm.api_key.clone(),
        settings.llm.extraction_model.clone(),
        settings.llm.embedding_model.clone(),
    ));

    let judge: Arc<dyn Judge> = Arc::new(LlmJudge::new(
        settings.llm.base_url.clone(),
        settings.llm.api_key.clone(),
        settings.llm.judge_model.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(tri_store.clone(), llm.clone(), judge, settings.reconciler.clone()));

    let task_queue = TaskQueue::spawn(
        settings.reconciler.worker_pool_size,
        relational.clone(),
        llm.clone(),
        reconciler.clone(),
        settings.reconciler.clone(),
    );

    let aggregator = Arc::new(Aggregator::new(relational.clone(), task_queue));

    info!("starting drift sweep, interval {}s", settings.reconciler.drift_sweep_interval_secs);
    let drift_sweep = Arc::new(DriftSweep::new(
        tri_store.clone(),
        reconciler.clone(),
        llm.clone(),
        Duration::from_secs(settings.reconciler.drift_sweep_interval_secs),
    ));
    drift_sweep.spawn();

    let retriever = Arc::new(Retriever::new(
        tri_store.clone(),
        llm.clone(),
        settings.retriever.clone(),
        settings.quota.clone(),
    ));

    let app_state = AppState {
        tri_store: tri_store.clone(),
        aggregator,
        retriever,
        quota_config: settings.quota.clone(),
    };

    let verifier: Arc<dyn ApiKeyVerifier> = Arc::new(CachingApiKeyVerifier::new(
        RelationalKeyVerifier(relational),
        Duration::from_secs(300),
    ));

    let authenticated_routes = Router::new()
        .route("/v1/memories", post(api::memories::create_memory))
        .route("/v1/memories/batch", post(api::memories::create_memories_batch))
        .route("/v1/memories/list", get(api::memories::list_memories))
        .route("/v1/memories/:id", delete(api::memories::delete_memory))
        .route("/v1/memories/search", post(api::search::search_memories))
        .route("/v1/memories/task/:task_id", get(api::tasks::get_task))
        .route("/v1/conversations/flush", post(api::conversations::flush_conversation))
        .route("/v1/quota", get(api::quota::get_quota))
        .route_layer(axum_middleware::from_fn_with_state(verifier, api_key_middleware))
        .with_state(app_state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(api::stats::get_stats))
        .route("/agents/auto-register", post(api::agents::auto_register))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(axum_middleware::from_fn(request_id::add_request_id))
        .layer(axum_middleware::from_fn(error_handler::handle_errors))
        .layer(cors);

    Ok(app)
}

async fn health_check() -> &'static str {
    "OK"
}
