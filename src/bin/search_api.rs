use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use shardsearch::{load_index, EncoderArgs, Error, ErrorKind, QueryEngine, QueryResult};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shardsearch-api",
    about = "HTTP API serving exhaustive cosine search over a sharded index"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "SHARDSEARCH_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding the shard files.
    #[arg(long, env = "SHARDSEARCH_INDEX_DIR", default_value = "index")]
    index_dir: PathBuf,

    /// Metadata field returned as each hit's description.
    #[arg(long, env = "SHARDSEARCH_DESCRIPTION_FIELD", default_value = "description")]
    description_field: String,

    /// Default top-k when the client does not override it.
    #[arg(long, env = "SHARDSEARCH_DEFAULT_TOP_K", default_value_t = 5)]
    default_top_k: usize,

    /// Maximum top-k allowed per request.
    #[arg(long, env = "SHARDSEARCH_MAX_TOP_K", default_value_t = 50)]
    max_top_k: usize,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, env = "SHARDSEARCH_EMBEDDING_CACHE", default_value_t = 1024)]
    embedding_cache_size: usize,

    #[command(flatten)]
    encoder: EncoderArgs,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<QueryEngine>,
    description_field: Arc<String>,
    default_top_k: usize,
    max_top_k: usize,
    embedding_cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchHit>,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    title: String,
    description: String,
    score: f32,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    documents: usize,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = ApiCli::parse();
    let encoder = cli.encoder.build().context("failed to build encoder")?;
    let corpus = load_index(&cli.index_dir)
        .with_context(|| format!("failed to load index from {:?}", cli.index_dir))?;
    info!(
        documents = corpus.len(),
        dimensions = corpus.dimensions(),
        model = encoder.model_id(),
        "index loaded"
    );

    let state = AppState {
        engine: Arc::new(QueryEngine::new(Arc::new(corpus), encoder)),
        description_field: Arc::new(cli.description_field),
        default_top_k: cli.default_top_k.max(1),
        max_top_k: cli.max_top_k.max(1),
        embedding_cache: build_cache(cli.embedding_cache_size),
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/search", get(search_get))
        .route("/v1/search", post(search_post))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    info!(%addr, "shardsearch-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Json<HealthBody> {
    let corpus = state.engine.corpus();
    Json(HealthBody {
        status: "ok",
        documents: corpus.len(),
        dimensions: corpus.dimensions(),
    })
}

async fn search_get(
    State(state): State<AppState>,
    Query(request): Query<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    search(state, request).await
}

async fn search_post(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    search(state, request).await
}

async fn search(state: AppState, request: SearchRequest) -> Result<Json<SearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "query text must not be empty",
        ));
    }
    let top_k = request
        .top_k
        .unwrap_or(state.default_top_k)
        .clamp(1, state.max_top_k);
    let start = Instant::now();

    let results = if state.engine.corpus().is_empty() {
        Vec::new()
    } else {
        let embedding = embed_query(&state, request.query.clone()).await?;
        let engine = state.engine.clone();
        tokio::task::spawn_blocking(move || engine.search_vector(&embedding, top_k))
            .await
            .map_err(|err| {
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("search task join error: {err}"),
                )
            })?
            .map_err(engine_error)?
    };

    let hits = results
        .into_iter()
        .map(|result| to_hit(result, &state.description_field))
        .collect();
    Ok(Json(SearchResponse {
        query: request.query,
        results: hits,
        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

fn to_hit(result: QueryResult, description_field: &str) -> SearchHit {
    let description = result
        .metadata
        .field(description_field)
        .unwrap_or_default()
        .to_string();
    SearchHit {
        title: result.metadata.indexed_field_value,
        description,
        score: result.score,
    }
}

async fn embed_query(state: &AppState, query: String) -> Result<Vec<f32>, ApiError> {
    if let Some(cache) = &state.embedding_cache {
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(&query).cloned()
        } {
            return Ok(hit);
        }
    }

    let encoder = state.engine.encoder().clone();
    let query_clone = query.clone();
    let embedding = tokio::task::spawn_blocking(move || encoder.encode(&query_clone))
        .await
        .map_err(|err| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("embedding task join error: {err}"),
            )
        })?
        .map_err(|err| engine_error(Error::Encoding(format!("{err:#}"))))?;

    if let Some(cache) = &state.embedding_cache {
        let mut guard = cache.lock().await;
        guard.put(query, embedding.clone());
    }
    Ok(embedding)
}

fn engine_error(err: Error) -> ApiError {
    let status = match err.kind() {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Encoding => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(%status, error = %err, "search failed");
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn build_cache(size: usize) -> Option<Arc<Mutex<LruCache<String, Vec<f32>>>>> {
    NonZeroUsize::new(size).map(|capacity| Arc::new(Mutex::new(LruCache::new(capacity))))
}
