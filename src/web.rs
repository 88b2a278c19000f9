//! HTTP surface for the search engine.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::{signal, sync::RwLock};
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogItem;
use crate::config::ServerConfig;
use crate::embedding::{loader, FeatureSource, ImageRef};
use crate::engine::{SearchEngine, SearchError, SearchOptions};

pub struct ServerState<S> {
    pub engine: SearchEngine<S>,
    pub catalog: RwLock<Vec<CatalogItem>>,
    pub dimensions: usize,
    pub shutdown: CancellationToken,
}

async fn start_app<S: FeatureSource + 'static>(
    state: ServerState<S>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let state = Arc::new(state);

    let signal = shutdown_signal(state.shutdown.clone());

    async fn shutdown_signal(token: CancellationToken) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        // In-flight searches observe this and return Cancelled.
        log::warn!("shutting down, cancelling in-flight searches");
        token.cancel();
    }

    let app = router(state, &config);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    log::info!("listening on {}", config.addr);
    axum::serve(listener, app).with_graceful_shutdown(signal).await?;
    Ok(())
}

pub fn router<S: FeatureSource + 'static>(
    state: Arc<ServerState<S>>,
    config: &ServerConfig,
) -> Router {
    Router::new()
        .route("/api/search", post(search::<S>))
        .route("/api/search/upload", post(search_upload::<S>))
        .route("/api/health", get(health::<S>))
        .layer(DefaultBodyLimit::max(config.max_body_mb * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

pub fn start_daemon<S: FeatureSource + 'static>(
    state: ServerState<S>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(state, config).await })
}

#[derive(Debug)]
enum HttpError {
    BadRequest(String),
    Search(SearchError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::BadRequest(message) => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": message}).to_string(),
            ),
            HttpError::Search(SearchError::QueryExtraction(e)) => {
                log::error!("query rejected: {e}");
                (
                    axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                    json!({"error": format!("could not process the query image: {e}")})
                        .to_string(),
                )
            }
            HttpError::Search(SearchError::Cancelled) => (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "search cancelled"}).to_string(),
            ),
        }
        .into_response()
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        Self::Search(err)
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct SearchRequest {
    /// Remote image to search by.
    pub image_url: Option<String>,

    /// Base64-encoded image bytes, as an alternative to `image_url`.
    pub image_base64: Option<String>,

    pub limit: Option<usize>,

    /// Override for the similarity threshold lower bound.
    pub floor: Option<f32>,
}

impl Debug for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SearchRequest {{ image_url: {:?}, image_base64: [REDACTED], limit: {:?}, floor: {:?} }}",
            self.image_url, self.limit, self.floor
        )
    }
}

async fn search<S: FeatureSource>(
    State(state): State<Arc<ServerState<S>>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Vec<serde_json::Value>>, HttpError> {
    log::debug!("payload: {payload:?}");

    let query = match (&payload.image_url, &payload.image_base64) {
        (Some(url), _) => ImageRef::parse(url),
        (None, Some(b64)) => {
            let bytes = STANDARD
                .decode(b64)
                .map_err(|e| HttpError::BadRequest(format!("invalid base64 image: {e}")))?;
            ImageRef::Bytes(bytes)
        }
        (None, None) => {
            return Err(HttpError::BadRequest(
                "either image_url or image_base64 is required".to_string(),
            ))
        }
    };

    run_search(&state, query, payload.limit, payload.floor).await
}

/// Multipart variant for browser uploads; expects a single `image` field.
async fn search_upload<S: FeatureSource>(
    State(state): State<Arc<ServerState<S>>>,
    mut multipart: Multipart,
) -> Result<Json<Vec<serde_json::Value>>, HttpError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut limit = None;
    let mut floor = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| HttpError::BadRequest(format!("invalid multipart field: {e}")))?;
        match name.as_str() {
            "image" => bytes = Some(data.to_vec()),
            "limit" => {
                let text = String::from_utf8_lossy(&data);
                limit = Some(text.trim().parse().map_err(|_| {
                    HttpError::BadRequest(format!("invalid limit: {}", text.trim()))
                })?);
            }
            "floor" => {
                let text = String::from_utf8_lossy(&data);
                floor = Some(text.trim().parse().map_err(|_| {
                    HttpError::BadRequest(format!("invalid floor: {}", text.trim()))
                })?);
            }
            _ => {}
        }
    }

    let Some(bytes) = bytes else {
        return Err(HttpError::BadRequest(
            "multipart field `image` is required".to_string(),
        ));
    };
    // Reject junk before it reaches the model.
    loader::decode_bytes(&bytes)
        .map_err(|e| HttpError::BadRequest(format!("unusable image upload: {e}")))?;

    run_search(&state, ImageRef::Bytes(bytes), limit, floor).await
}

async fn run_search<S: FeatureSource>(
    state: &ServerState<S>,
    query: ImageRef,
    limit: Option<usize>,
    floor: Option<f32>,
) -> Result<Json<Vec<serde_json::Value>>, HttpError> {
    let opts = SearchOptions {
        limit: limit.unwrap_or(state.engine.config().default_limit),
        floor: floor.unwrap_or(state.engine.config().default_floor),
    };

    // Child of the shutdown token, so a stopping server cancels the
    // search without the request having to poll for it.
    let cancel = state.shutdown.child_token();
    let catalog = state.catalog.read().await;
    let hits = state.engine.search(&query, &catalog, &opts, &cancel).await?;

    // Merge pass-through display fields into each row.
    let rows = hits
        .into_iter()
        .map(|hit| {
            let mut row = serde_json::Map::new();
            row.insert("id".to_string(), json!(hit.id));
            row.insert("score".to_string(), json!(hit.score));
            if let Some(item) = catalog.iter().find(|item| item.id == hit.id) {
                row.insert("image".to_string(), json!(item.image));
                for (key, value) in &item.display {
                    row.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            serde_json::Value::Object(row)
        })
        .collect();

    Ok(Json(rows))
}

async fn health<S: FeatureSource>(
    State(state): State<Arc<ServerState<S>>>,
) -> Json<serde_json::Value> {
    let catalog = state.catalog.read().await;
    Json(json!({
        "status": "ok",
        "model_version": state.engine.model_version(),
        "dimensions": state.dimensions,
        "catalog_items": catalog.len(),
    }))
}
