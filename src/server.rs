//! In-memory exchange service speaking the same API the client consumes.
//!
//! Used by `pickup serve` for local development and by the integration
//! tests. Sessions live until deleted.

use axum::{
    Router,
    extract::{Query, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Json},
    routing::get,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::code::PickupCode;
use crate::record::FileRef;
use crate::remote::{EXIST_PATH, FILES_PATH, UploadRequest};

const RANDOM_ATTEMPTS: usize = 32;

#[derive(Clone, Default)]
pub struct ExchangeState {
    pub sessions: Arc<DashMap<String, Vec<FileRef>>>,
}

impl ExchangeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `files` under a fresh code. `None` when every code is taken.
    fn mint(&self, files: Vec<FileRef>) -> Option<String> {
        let mut rng = rand::thread_rng();
        let random = (0..RANDOM_ATTEMPTS).map(|_| rng.gen_range(0..10_000u32));
        let candidates = random.chain(0..10_000u32);

        for n in candidates {
            let code = format!("{n:04}");
            if let Entry::Vacant(slot) = self.sessions.entry(code.clone()) {
                slot.insert(files);
                return Some(code);
            }
        }
        None
    }
}

#[derive(Deserialize)]
pub struct CodeQuery {
    code: String,
}

fn error_body(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn parse_code(query: &CodeQuery) -> Result<PickupCode, axum::response::Response> {
    PickupCode::parse(&query.code)
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "code must be 4 digits"))
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn upload_files(
    State(state): State<ExchangeState>,
    Json(request): Json<UploadRequest>,
) -> impl IntoResponse {
    if request.files.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "no files provided");
    }

    let count = request.files.len();
    match state.mint(request.files) {
        Some(code) => {
            info!(code = %code, files = count, "session created");
            (StatusCode::OK, Json(serde_json::json!({ "code": code }))).into_response()
        }
        None => error_body(StatusCode::SERVICE_UNAVAILABLE, "no codes available"),
    }
}

pub async fn get_files(
    Query(query): Query<CodeQuery>,
    State(state): State<ExchangeState>,
) -> impl IntoResponse {
    let code = match parse_code(&query) {
        Ok(code) => code,
        Err(response) => return response,
    };

    match state.sessions.get(code.as_str()) {
        Some(files) => (
            StatusCode::OK,
            Json(serde_json::json!({ "files": files.value() })),
        )
            .into_response(),
        None => error_body(StatusCode::NOT_FOUND, "code not found"),
    }
}

pub async fn code_exists(
    Query(query): Query<CodeQuery>,
    State(state): State<ExchangeState>,
) -> impl IntoResponse {
    let code = match parse_code(&query) {
        Ok(code) => code,
        Err(response) => return response,
    };

    let exists = state.sessions.contains_key(code.as_str());
    (StatusCode::OK, Json(serde_json::json!({ "exists": exists }))).into_response()
}

pub async fn delete_files(
    Query(query): Query<CodeQuery>,
    State(state): State<ExchangeState>,
) -> impl IntoResponse {
    let code = match parse_code(&query) {
        Ok(code) => code,
        Err(response) => return response,
    };

    match state.sessions.remove(code.as_str()) {
        Some(_) => {
            info!(code = %code, "session deleted");
            (StatusCode::OK, Json(serde_json::json!({ "deleted": true }))).into_response()
        }
        None => error_body(StatusCode::NOT_FOUND, "code not found"),
    }
}

pub fn router(state: ExchangeState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route(
            FILES_PATH,
            get(get_files).post(upload_files).delete(delete_files),
        )
        .route(EXIST_PATH, get(code_exists))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ExchangeState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("pickup exchange listening on {addr}");
    }
    axum::serve(listener, router(state)).await
}
