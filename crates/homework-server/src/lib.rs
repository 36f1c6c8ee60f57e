//! HTTP routes for configuration and chat.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use homework::handler::{ApiResponse, ConfigurationHandler, ConfigurationStatus, UpdateRequest, UpdateSummary};
use homework::llm::LlmClient;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared server state.
pub struct AppState {
    handler: ConfigurationHandler,
    /// Serializes handler calls: each runs to completion before the next.
    config_lock: Mutex<()>,
    /// Keyless client; each chat request clones it and adds the current key.
    llm: LlmClient,
}

impl AppState {
    pub fn new(handler: ConfigurationHandler) -> Self {
        Self {
            handler,
            config_lock: Mutex::new(()),
            llm: LlmClient::new(None),
        }
    }

    pub fn with_llm_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.llm = self.llm.with_base_url(base_url);
        self
    }
}

/// Run `f` against the handler on the blocking pool, holding the config lock.
///
/// Handler calls read and write files and may call into the OS keystore.
async fn with_handler<R, F>(state: &Arc<AppState>, f: F) -> Result<R, JoinError>
where
    F: FnOnce(&ConfigurationHandler) -> R + Send + 'static,
    R: Send + 'static,
{
    let _guard = state.config_lock.lock().await;
    let worker = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&worker.handler)).await
}

fn task_failed<T>(err: JoinError) -> ApiResponse<T> {
    tracing::error!(error = %err, "Configuration task failed");
    ApiResponse::failed("Internal error while accessing configuration", None)
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Chat reply payload.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub response: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/configuration",
            get(get_configuration).post(update_configuration),
        )
        .route("/api/chat", post(chat))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/configuration
async fn get_configuration(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<ConfigurationStatus>> {
    let response = with_handler(&state, |handler| handler.get_configuration_status()).await;
    Json(response.unwrap_or_else(task_failed))
}

/// POST /api/configuration
async fn update_configuration(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateRequest>,
) -> Json<ApiResponse<UpdateSummary>> {
    let response = with_handler(&state, move |handler| handler.update_configuration(&request)).await;
    Json(response.unwrap_or_else(task_failed))
}

/// POST /api/chat
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Json<ApiResponse<ChatReply>> {
    let api_key =
        match with_handler(&state, |handler| handler.credentials().get_openai_key()).await {
            Ok(api_key) => api_key,
            Err(err) => return Json(task_failed(err)),
        };

    let mut client = state.llm.clone().with_api_key(api_key);
    if let Some(model) = request.model {
        client = client.with_model(model);
    }

    match client.complete(&request.message).await {
        Ok(response) => Json(ApiResponse::ok(
            "Chat response generated",
            ChatReply {
                response,
                model: client.model().to_string(),
            },
        )),
        Err(err) => {
            tracing::warn!(error = %err, "Chat completion failed");
            Json(ApiResponse::failed(err.to_string(), None))
        }
    }
}
