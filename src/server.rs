//! HTTP server.
//!
//! Exposes the translation pipeline as a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Translate and execute a natural-language query |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Request / Response
//!
//! ```json
//! // POST /query
//! { "query": "show all users" }
//!
//! // 200 OK
//! {
//!   "user_query": "show all users",
//!   "generated_command": "db.users.find({})",
//!   "db_result": [ { "_id": { "$oid": "..." }, "name": "John" } ]
//! }
//! ```
//!
//! A command that could not be matched or executed still returns `200`; the
//! failure is in `db_result.error`. Only these are HTTP errors:
//!
//! ```json
//! { "error": { "code": "missing_query", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `missing_query` (400), `translation_failed` (502),
//! `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::TranslateError;
use crate::translate::{ResponseEnvelope, Translator};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    translator: Arc<Translator>,
}

/// Build the router. Split out from [`run_server`] so tests can serve it on
/// their own listener.
pub fn router(translator: Arc<Translator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { translator })
}

/// Starts the HTTP server on `bind_addr` and runs until the process exits.
pub async fn run_server(bind_addr: &str, translator: Arc<Translator>) -> anyhow::Result<()> {
    let app = router(translator);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<TranslateError> for AppError {
    fn from(err: TranslateError) -> Self {
        let status = match &err {
            TranslateError::MissingQuery => StatusCode::BAD_REQUEST,
            TranslateError::TranslationFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = if err.is_transport_level() {
            err.code()
        } else {
            "internal"
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: Option<String>,
}

/// Handler for `POST /query`.
///
/// A missing body, a body without `query`, or an empty `query` are all
/// `missing_query`.
async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<ResponseEnvelope>, AppError> {
    let query = match payload {
        Ok(Json(req)) => req.query.unwrap_or_default(),
        Err(rejection) => {
            tracing::debug!("rejected body: {}", rejection);
            String::new()
        }
    };

    let envelope = state.translator.translate(&query).await?;
    Ok(Json(envelope))
}
