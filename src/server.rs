//! HTTP API for the search and document chats.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search/chat` | One search-chat turn |
//! | `POST` | `/docs/{id}/chat` | One document-chat turn |
//! | `GET`  | `/docs` | All documents with their ETF assignments |
//! | `GET`  | `/etfs/{isin}/docs` | Documents assigned to an ETF |
//! | `DELETE` | `/sessions/{id}` | Close a session (search and document chats) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Chat requests carry an optional `session_id`. Without one a new
//! session is created and its id returned. Each session keeps its own
//! conversation memory and runs one turn at a time; concurrent requests
//! on the same session wait for each other.
//!
//! At most `server.max_sessions` sessions of each kind are kept. Sessions
//! idle for `server.session_idle_secs` are dropped on the next insert, and
//! a full registry drops its least recently used session.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Document 7 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::app::Services;
use crate::chat::docqa::SourcePages;
use crate::chat::{DocumentQaChat, EtfSearchChat};
use crate::docs_db::DocMetadata;
use etf_assistant_core::results::ResultSet;

type Session<T> = Arc<Mutex<T>>;

struct Slot<T> {
    chat: Session<T>,
    last_used: Instant,
}

/// Chat sessions of one kind, bounded in count and idle time.
struct SessionRegistry<K, T> {
    slots: Mutex<HashMap<K, Slot<T>>>,
    max_sessions: usize,
    idle: Duration,
}

impl<K: Eq + Hash + Clone, T> SessionRegistry<K, T> {
    fn new(max_sessions: usize, idle: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            idle,
        }
    }

    async fn get(&self, key: &K) -> Option<Session<T>> {
        self.get_at(key, Instant::now()).await
    }

    async fn get_at(&self, key: &K, now: Instant) -> Option<Session<T>> {
        let mut slots = self.slots.lock().await;
        let expired = now.saturating_duration_since(slots.get(key)?.last_used) > self.idle;
        if expired {
            slots.remove(key);
            return None;
        }
        let slot = slots.get_mut(key)?;
        slot.last_used = now;
        Some(Arc::clone(&slot.chat))
    }

    async fn insert(&self, key: K, chat: T) -> Session<T> {
        self.insert_at(key, chat, Instant::now()).await
    }

    /// Store `chat` under `key` unless a session already holds the key.
    /// Expired sessions are swept first; a full registry then drops its
    /// least recently used session.
    async fn insert_at(&self, key: K, chat: T, now: Instant) -> Session<T> {
        let mut slots = self.slots.lock().await;
        slots.retain(|_, slot| now.saturating_duration_since(slot.last_used) <= self.idle);

        if !slots.contains_key(&key) {
            while slots.len() >= self.max_sessions {
                let oldest = slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        slots.remove(&k);
                    }
                    None => break,
                }
            }
        }

        let slot = slots.entry(key).or_insert_with(|| Slot {
            chat: Arc::new(Mutex::new(chat)),
            last_used: now,
        });
        slot.last_used = now;
        Arc::clone(&slot.chat)
    }

    /// Drop every session whose key matches. Returns how many were dropped.
    async fn remove_where(&self, matches: impl Fn(&K) -> bool) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|k, _| !matches(k));
        before - slots.len()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
    search_sessions: Arc<SessionRegistry<String, EtfSearchChat>>,
    doc_sessions: Arc<SessionRegistry<(String, i64), DocumentQaChat>>,
}

pub async fn run_server(services: Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(Arc::new(services));

    tracing::info!(addr = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(services: Arc<Services>) -> Router {
    let max_sessions = services.config.server.max_sessions;
    let idle = Duration::from_secs(services.config.server.session_idle_secs);
    let state = AppState {
        services,
        search_sessions: Arc::new(SessionRegistry::new(max_sessions, idle)),
        doc_sessions: Arc::new(SessionRegistry::new(max_sessions, idle)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search/chat", post(handle_search_chat))
        .route("/docs", get(handle_list_docs))
        .route("/docs/{id}/chat", post(handle_doc_chat))
        .route("/etfs/{isin}/docs", get(handle_etf_docs))
        .route("/sessions/{id}", delete(handle_close_session))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
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

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    question: String,
}

impl ChatRequest {
    fn validate(self) -> Result<(String, String), AppError> {
        if self.question.trim().is_empty() {
            return Err(bad_request("question must not be empty"));
        }
        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok((session_id, self.question))
    }
}

#[derive(Serialize)]
struct SearchChatResponse {
    session_id: String,
    answer: String,
    query: Option<String>,
    results: Option<ResultSet>,
}

async fn handle_search_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<SearchChatResponse>, AppError> {
    let (session_id, question) = req.validate()?;

    let session = match state.search_sessions.get(&session_id).await {
        Some(s) => s,
        None => {
            let chat = state.services.search_chat().await.map_err(internal)?;
            state.search_sessions.insert(session_id.clone(), chat).await
        }
    };

    let reply = session.lock().await.chat(&question).await.map_err(internal)?;
    Ok(Json(SearchChatResponse {
        session_id,
        answer: reply.answer,
        query: reply.query,
        results: reply.results,
    }))
}

#[derive(Serialize)]
struct DocChatResponse {
    session_id: String,
    answer: String,
    sources: SourcePages,
}

async fn handle_doc_chat(
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<DocChatResponse>, AppError> {
    let (session_id, question) = req.validate()?;
    let key = (session_id.clone(), doc_id);

    let session = match state.doc_sessions.get(&key).await {
        Some(s) => s,
        None => {
            if state
                .services
                .storage
                .docs()
                .get_doc(doc_id)
                .await
                .map_err(internal)?
                .is_none()
            {
                return Err(not_found(format!("Document {} not found", doc_id)));
            }
            let chat = state.services.document_chat(doc_id).await.map_err(internal)?;
            state.doc_sessions.insert(key, chat).await
        }
    };

    let reply = session.lock().await.chat(&question).await.map_err(internal)?;
    Ok(Json(DocChatResponse {
        session_id,
        answer: reply.answer,
        sources: reply.sources,
    }))
}

// ============ DELETE /sessions/{id} ============

async fn handle_close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let closed = state.search_sessions.remove_where(|id| *id == session_id).await
        + state.doc_sessions.remove_where(|(id, _)| *id == session_id).await;
    if closed == 0 {
        return Err(not_found(format!("Session {} not found", session_id)));
    }
    tracing::info!(session_id = %session_id, closed, "session closed");
    Ok(StatusCode::NO_CONTENT)
}

// ============ Documents ============

#[derive(Serialize)]
struct DocEntry {
    #[serde(flatten)]
    doc: DocMetadata,
    etfs: Vec<String>,
}

#[derive(Serialize)]
struct DocListResponse {
    docs: Vec<DocEntry>,
}

async fn handle_list_docs(State(state): State<AppState>) -> Result<Json<DocListResponse>, AppError> {
    let docs_db = state.services.storage.docs();
    let mut docs = Vec::new();
    for doc in docs_db.get_docs().await.map_err(internal)? {
        let etfs = docs_db.get_doc_etfs(doc.id).await.map_err(internal)?;
        docs.push(DocEntry { doc, etfs });
    }
    Ok(Json(DocListResponse { docs }))
}

async fn handle_etf_docs(
    State(state): State<AppState>,
    Path(isin): Path<String>,
) -> Result<Json<DocListResponse>, AppError> {
    let docs_db = state.services.storage.docs();
    let mut docs = Vec::new();
    for doc in docs_db.get_docs_by_etf(&isin).await.map_err(internal)? {
        let etfs = docs_db.get_doc_etfs(doc.id).await.map_err(internal)?;
        docs.push(DocEntry { doc, etfs });
    }
    Ok(Json(DocListResponse { docs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_sessions: usize) -> SessionRegistry<String, String> {
        SessionRegistry::new(max_sessions, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn full_registry_drops_least_recently_used() {
        let sessions = registry(2);
        let t0 = Instant::now();
        sessions.insert_at("a".into(), "chat a".into(), t0).await;
        sessions
            .insert_at("b".into(), "chat b".into(), t0 + Duration::from_secs(1))
            .await;
        // touching "a" makes "b" the oldest
        assert!(sessions
            .get_at(&"a".to_string(), t0 + Duration::from_secs(2))
            .await
            .is_some());

        sessions
            .insert_at("c".into(), "chat c".into(), t0 + Duration::from_secs(3))
            .await;

        assert_eq!(sessions.len().await, 2);
        let now = t0 + Duration::from_secs(4);
        assert!(sessions.get_at(&"b".to_string(), now).await.is_none());
        assert!(sessions.get_at(&"a".to_string(), now).await.is_some());
        assert!(sessions.get_at(&"c".to_string(), now).await.is_some());
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let sessions = registry(10);
        let t0 = Instant::now();
        sessions.insert_at("a".into(), "chat a".into(), t0).await;
        sessions.insert_at("b".into(), "chat b".into(), t0).await;

        let later = t0 + Duration::from_secs(61);
        assert!(sessions.get_at(&"a".to_string(), later).await.is_none());
        sessions.insert_at("c".into(), "chat c".into(), later).await;
        assert_eq!(sessions.len().await, 1);
    }

    #[tokio::test]
    async fn existing_key_keeps_its_chat() {
        let sessions = registry(1);
        let t0 = Instant::now();
        sessions.insert_at("a".into(), "first".into(), t0).await;
        let chat = sessions.insert_at("a".into(), "second".into(), t0).await;
        assert_eq!(*chat.lock().await, "first");
        assert_eq!(sessions.len().await, 1);
    }

    #[tokio::test]
    async fn remove_where_drops_matching_keys() {
        let sessions: SessionRegistry<(String, i64), String> =
            SessionRegistry::new(10, Duration::from_secs(60));
        sessions.insert(("s1".into(), 1), "one".into()).await;
        sessions.insert(("s1".into(), 2), "two".into()).await;
        sessions.insert(("s2".into(), 1), "three".into()).await;

        assert_eq!(sessions.remove_where(|(id, _)| id == "s1").await, 2);
        assert_eq!(sessions.len().await, 1);
        assert_eq!(sessions.remove_where(|(id, _)| id == "s1").await, 0);
    }
}
