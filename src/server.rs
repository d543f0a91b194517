//! The HTTP API.
//!
//! Every route except `/health` and `/login` needs a session. The session token is handed out by
//! `/login` as the `portal_session` cookie and may also be sent as a bearer token. Handlers only
//! resolve the acting [`Principal`]; the component functions decide what that principal may do.
//!
//! Database work is synchronous, so it runs on the blocking pool and never on the async workers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::IntoResponse,
    routing::{get, post, put},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::{net::TcpListener, signal, task};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{self, Principal, Role};
use crate::config::Settings;
use crate::error::{PortalError, Result};
use crate::export;
use crate::extract::{Json, Path, Query, Text};
use crate::ledger;
use crate::manager::PortalManager;
use crate::models::{NewStudent, RosterFilter, StudentUpdate};
use crate::notes::{self, NoteStorage, NoteUpload};
use crate::registry;
use crate::session::SessionStore;

pub const SESSION_COOKIE: &str = "portal_session";

/// Shared state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<PortalManager>>,
    pub sessions: Arc<SessionStore>,
    pub storage: Arc<NoteStorage>,
    lock_timeout: Duration,
    cookie_secure: bool,
}

impl AppState {
    pub fn new(manager: PortalManager, settings: &Settings) -> Self {
        Self {
            db: Arc::new(Mutex::new(manager)),
            sessions: Arc::new(SessionStore::new(settings.session_ttl())),
            storage: Arc::new(settings.note_storage()),
            lock_timeout: settings.db_lock_timeout(),
            cookie_secure: settings.cookie_secure,
        }
    }

    /// Runs `f` against the database on the blocking pool.
    ///
    /// The wait for the connection is bounded by the configured lock timeout; a busy database is
    /// reported as unavailable instead of hanging.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PortalManager) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let timeout = self.lock_timeout;

        task::spawn_blocking(move || {
            let mut guard = db.try_lock_for(timeout).ok_or_else(|| {
                PortalError::Unavailable("database is busy, try again".to_string())
            })?;
            f(&mut guard)
        })
        .await?
    }

    fn session_cookie(&self, token: &str) -> String {
        let max_age = self.sessions.ttl().as_secs();
        let secure = if self.cookie_secure { "; Secure" } else { "" };
        format!("{SESSION_COOKIE}={token}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Strict{secure}")
    }
}

fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=deleted; Max-Age=0; Path=/; HttpOnly; SameSite=Strict")
}

fn parse_cookie<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// The session attached to a request.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub token: String,
    pub principal: Principal,
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parse_cookie(&parts.headers, SESSION_COOKIE)
            .or_else(|| bearer_token(&parts.headers))
            .ok_or(PortalError::Unauthenticated)?;

        let principal = state
            .sessions
            .validate(token)
            .ok_or(PortalError::Unauthenticated)?;

        Ok(Self {
            token: token.to_string(),
            principal,
        })
    }
}

pub fn router(state: AppState) -> Router {
    // Uploads arrive base64 encoded inside JSON, which is a third larger than the file.
    let body_limit = state.storage.max_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/students", get(list_students).post(create_student))
        .route("/students/import", post(import_students))
        .route(
            "/students/{usn}",
            get(get_student).patch(update_student).delete(delete_student),
        )
        .route("/students/{usn}/marks", get(get_marks).delete(reset_marks))
        .route("/students/{usn}/marks/{subject}", put(set_mark))
        .route("/students/{usn}/marksheet", get(download_marksheet))
        .route("/notes", get(list_notes).post(upload_note))
        .route("/notes/{id}/download", get(download_note))
        .fallback(unknown_route)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connects to the database, seeds the configured teacher and serves until shutdown.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!("Connecting to {}", settings.database_url);
    let mut manager = PortalManager::connect(&settings.database_url)?;

    if let Some(seed) = &settings.seed_teacher {
        if auth::seed_teacher(&mut manager, &seed.username, &seed.password)? {
            info!(username = %seed.username, "seeded initial teacher account");
        }
    }
    if manager.num_teachers()? == 0 {
        warn!("No teacher accounts exist; create one with `portal add-teacher`");
    }

    let state = AppState::new(manager, &settings);
    let app = router(state);

    let listener = TcpListener::bind(&settings.bind_address).await?;
    info!("Server running on {}", settings.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// --- handlers -----------------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn unknown_route() -> PortalError {
    PortalError::NotFound("no such route".to_string())
}

#[derive(Deserialize)]
struct LoginRequest {
    role: Role,
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let LoginRequest {
        role,
        username,
        password,
    } = request;

    let pending = {
        let password = password.clone();
        state
            .with_db(move |db| auth::lookup_login(db, role, &username, &password))
            .await?
    };

    // Hash verification is slow, so it runs after the database has been released.
    let principal =
        task::spawn_blocking(move || auth::complete_login(role, pending, &password)).await??;

    let session = state.sessions.issue(principal)?;
    let cookie = state.session_cookie(&session.token);

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "token": session.token,
            "principal": session.principal,
        })),
    ))
}

async fn logout(State(state): State<AppState>, session: Authenticated) -> impl IntoResponse {
    state.sessions.revoke(&session.token);
    info!(identity = session.principal.identity(), "logged out");

    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(json!({ "status": "logged out" })),
    )
}

async fn me(session: Authenticated) -> impl IntoResponse {
    Json(session.principal)
}

async fn list_students(
    State(state): State<AppState>,
    session: Authenticated,
    Query(filter): Query<RosterFilter>,
) -> Result<impl IntoResponse> {
    let students = state
        .with_db(move |db| registry::list_students(db, &session.principal, &filter))
        .await?;
    Ok(Json(students))
}

async fn create_student(
    State(state): State<AppState>,
    session: Authenticated,
    Json(form): Json<NewStudent>,
) -> Result<impl IntoResponse> {
    let student = state
        .with_db(move |db| registry::create_student(db, &session.principal, &form))
        .await?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn import_students(
    State(state): State<AppState>,
    session: Authenticated,
    Text(body): Text,
) -> Result<impl IntoResponse> {
    let report = state
        .with_db(move |db| registry::bulk_import(db, &session.principal, body.as_bytes()))
        .await?;
    Ok(Json(report))
}

async fn get_student(
    State(state): State<AppState>,
    session: Authenticated,
    Path(usn): Path<String>,
) -> Result<impl IntoResponse> {
    let student = state
        .with_db(move |db| registry::get_student(db, &session.principal, &usn))
        .await?;
    Ok(Json(student))
}

async fn update_student(
    State(state): State<AppState>,
    session: Authenticated,
    Path(usn): Path<String>,
    Json(changes): Json<StudentUpdate>,
) -> Result<impl IntoResponse> {
    let student = state
        .with_db(move |db| registry::update_student(db, &session.principal, &usn, &changes))
        .await?;
    Ok(Json(student))
}

async fn delete_student(
    State(state): State<AppState>,
    session: Authenticated,
    Path(usn): Path<String>,
) -> Result<impl IntoResponse> {
    let student = state
        .with_db(move |db| registry::delete_student(db, &session.principal, &usn))
        .await?;

    // A removed student can no longer be signed in.
    let revoked = state.sessions.revoke_identity(Role::Student, &student.usn);
    info!(usn = %student.usn, revoked, "sessions of deleted student revoked");

    Ok(Json(student))
}

async fn get_marks(
    State(state): State<AppState>,
    session: Authenticated,
    Path(usn): Path<String>,
) -> Result<impl IntoResponse> {
    let marks = state
        .with_db(move |db| ledger::get_marks_for_student(db, &session.principal, &usn))
        .await?;
    Ok(Json(marks))
}

#[derive(Deserialize)]
struct ScoreBody {
    score: i32,
}

async fn set_mark(
    State(state): State<AppState>,
    session: Authenticated,
    Path((usn, subject)): Path<(String, String)>,
    Json(body): Json<ScoreBody>,
) -> Result<impl IntoResponse> {
    let entry = state
        .with_db(move |db| ledger::set_mark(db, &session.principal, &usn, &subject, body.score))
        .await?;
    Ok(Json(entry))
}

async fn reset_marks(
    State(state): State<AppState>,
    session: Authenticated,
    Path(usn): Path<String>,
) -> Result<impl IntoResponse> {
    let removed = state
        .with_db(move |db| ledger::reset_marks(db, &session.principal, &usn))
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

fn attachment(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

async fn download_marksheet(
    State(state): State<AppState>,
    session: Authenticated,
    Path(usn): Path<String>,
) -> Result<impl IntoResponse> {
    let (filename, html) = state
        .with_db(move |db| export::export_marksheet(db, &session.principal, &usn))
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&filename)),
        ],
        html,
    ))
}

#[derive(Deserialize)]
struct NotesQuery {
    subject: Option<String>,
}

async fn list_notes(
    State(state): State<AppState>,
    session: Authenticated,
    Query(query): Query<NotesQuery>,
) -> Result<impl IntoResponse> {
    let subject = query
        .subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let found = state
        .with_db(move |db| match subject {
            Some(subject) => notes::list_notes_by_subject(db, &session.principal, &subject),
            None => notes::list_all_notes(db, &session.principal),
        })
        .await?;
    Ok(Json(found))
}

#[derive(Deserialize)]
struct UploadBody {
    subject: String,
    module: Option<String>,
    filename: String,
    /// File contents, standard base64.
    content: String,
}

async fn upload_note(
    State(state): State<AppState>,
    session: Authenticated,
    Json(body): Json<UploadBody>,
) -> Result<impl IntoResponse> {
    // Check the role before decoding a potentially large payload.
    session.principal.require_teacher()?;

    let content = STANDARD
        .decode(body.content.trim())
        .map_err(|e| PortalError::Validation(format!("content is not valid base64: {e}")))?;

    let upload = NoteUpload {
        subject: body.subject,
        module: body.module,
        filename: body.filename,
        content,
    };
    let storage = Arc::clone(&state.storage);
    let note = state
        .with_db(move |db| notes::add_note(db, &storage, &session.principal, &upload))
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("txt") => "text/plain; charset=utf-8",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        _ => "application/octet-stream",
    }
}

async fn download_note(
    State(state): State<AppState>,
    session: Authenticated,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse> {
    let (note, content) = state
        .with_db(move |db| notes::read_note(db, &session.principal, id))
        .await?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                content_type_for(&note.filename).to_string(),
            ),
            (header::CONTENT_DISPOSITION, attachment(&note.filename)),
        ],
        content,
    ))
}
