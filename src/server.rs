//!
//! pointgate HTTP server
//! ---------------------
//! This module defines the Axum-based HTTP API for the transport portal core.
//!
//! Responsibilities:
//! - Login/logout endpoints backed by the `identity` verifier, with a simple
//!   session-cookie model and explicit status codes per error kind.
//! - The per-client session surface (`GET /me`).
//! - Latest-position read and position ingest endpoints for the tracking map.
//! - Admin-gated roster endpoints for student and driver records.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::{get, post, delete}, Router, extract::{State, Path}, Form, Json};
use axum::response::IntoResponse;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use std::panic::AssertUnwindSafe;
use futures_util::FutureExt; // for catch_unwind on async blocks

use crate::config::{ServerConfig, StoreConfig, StoreKind};
use crate::error::AppError;
use crate::identity::{issue_session_id, verify, RequestContext, Role, SessionManager};
use crate::store::{DriverRecord, MemStore, PgStore, PortalStore, PositionSample, StoreError, StudentRecord};

const SESSION_COOKIE: &str = "pointgate_session";

static DRIVER_PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10}$").expect("static regex"));

/// Shared server state injected into all handlers: the store capability and
/// the per-client session manager.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PortalStore>,
    pub sessions: SessionManager,
}

/// Convenience entry point using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(ServerConfig::from_env(), StoreConfig::from_env()).await
}

pub async fn run_with_config(server: ServerConfig, store_cfg: StoreConfig) -> anyhow::Result<()> {
    let store: Arc<dyn PortalStore> = match store_cfg.kind {
        StoreKind::Postgres => Arc::new(PgStore::new(store_cfg)),
        StoreKind::Memory => {
            info!("using in-memory store; records do not survive a restart");
            Arc::new(MemStore::new())
        }
    };
    let state = AppState { store, sessions: SessionManager::new(server.session_ttl) };

    let addr: SocketAddr = format!("0.0.0.0:{}", server.http_port).parse()?;
    info!("Starting pointgate server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Build the full route table over the given state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "pointgate ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/api/getLatestPosition", get(latest_position))
        .route("/api/position", post(report_position))
        .route("/api/students", get(list_students).post(add_student))
        .route("/api/students/{id}", delete(delete_student))
        .route("/api/drivers", get(list_drivers).post(add_driver))
        .route("/api/drivers/{id}", delete(delete_driver))
        .with_state(state)
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

fn set_session_cookie(sid: &str) -> HeaderValue {
    // Secure, HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/", SESSION_COOKIE, sid)).unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!("{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/", SESSION_COOKIE)).unwrap()
}

fn client_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    RequestContext::resolve(&state.sessions, parse_cookie(headers, SESSION_COOKIE))
}

fn error_json(err: &AppError) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status":"error","code": err.code_str(),"message": err.message()})))
}

fn store_error(err: StoreError) -> AppError {
    match err {
        StoreError::Duplicate(id) => {
            AppError::conflict("duplicate_record".to_string(), format!("record already exists: {id}"))
        }
        other => AppError::store_unavailable("store_unavailable".to_string(), other.to_string()),
    }
}

/// Roster endpoints require an authenticated admin session.
fn require_admin(ctx: &RequestContext) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if ctx.principal.is_none() {
        return Err((StatusCode::UNAUTHORIZED, Json(json!({"status":"unauthorized"}))));
    }
    if !ctx.is_admin() {
        return Err((StatusCode::FORBIDDEN, Json(json!({"status":"forbidden"}))));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    role: Role,
    identifier: String,
    secret: String,
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(payload): Form<LoginPayload>,
) -> impl IntoResponse {
    let verify_fut = async {
        verify(state.store.as_ref(), payload.role, &payload.identifier, &payload.secret).await
    };
    match AssertUnwindSafe(verify_fut).catch_unwind().await {
        Ok(Ok(principal)) => {
            // Reuse the client's session id when one is presented so a
            // re-login overwrites that session in place.
            let sid = parse_cookie(&headers, SESSION_COOKIE).unwrap_or_else(issue_session_id);
            let redirect = match principal.role {
                Role::Student => "/student",
                Role::Admin => "/admin",
            };
            state.sessions.establish(&sid, principal);
            let mut h = HeaderMap::new();
            h.insert("Set-Cookie", set_session_cookie(&sid));
            (StatusCode::OK, h, Json(json!({"status":"ok","redirect": redirect})))
        }
        Ok(Err(e)) => {
            let app = AppError::from(e);
            if matches!(app, AppError::StoreUnavailable { .. }) {
                error!("login store failure: {}", app.message());
            }
            let (status, body) = error_json(&app);
            (status, HeaderMap::new(), body)
        }
        Err(panic_payload) => {
            // Convert panics to a 500 error response without crashing the server task
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() { *s }
                      else if let Some(s) = panic_payload.downcast_ref::<String>() { s.as_str() }
                      else { "panic" };
            error!(target: "panic", "login handler panic: {}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), Json(json!({
                "status":"error",
                "code":"internal_panic",
                "message":"internal server error"
            })))
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(sid) = parse_cookie(&headers, SESSION_COOKIE) {
        state.sessions.clear(&sid);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"status":"ok"})))
}

/// The per-client session surface: the authenticated principal's fields.
async fn me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    match ctx.principal {
        Some(p) => (StatusCode::OK, Json(json!({"status":"ok","principal": p}))),
        None => (StatusCode::UNAUTHORIZED, Json(json!({"status":"unauthorized"}))),
    }
}

async fn latest_position(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.latest_position().await {
        Ok(Some(sample)) => (StatusCode::OK, Json(json!({"lat": sample.lat, "lng": sample.lng}))),
        Ok(None) => error_json(&AppError::not_found("no_position", "No position recorded yet")),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn report_position(
    State(state): State<AppState>,
    Json(sample): Json<PositionSample>,
) -> impl IntoResponse {
    match state.store.record_position(sample).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn list_students(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    if let Err(resp) = require_admin(&ctx) { return resp; }
    match state.store.list_students().await {
        Ok(records) => (StatusCode::OK, Json(json!(records))),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn add_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<StudentRecord>,
) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    if let Err(resp) = require_admin(&ctx) { return resp; }
    match state.store.add_student(&record).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn delete_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    if let Err(resp) = require_admin(&ctx) { return resp; }
    match state.store.delete_student(&id).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Ok(false) => error_json(&AppError::not_found("unknown_student", "No such student")),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn list_drivers(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    if let Err(resp) = require_admin(&ctx) { return resp; }
    match state.store.list_drivers().await {
        Ok(records) => (StatusCode::OK, Json(json!(records))),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn add_driver(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<DriverRecord>,
) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    if let Err(resp) = require_admin(&ctx) { return resp; }
    // Drivers must be reachable: exactly ten digits.
    if !DRIVER_PHONE_RE.is_match(&record.phone) {
        return error_json(&AppError::format(
            "invalid_phone",
            "Invalid phone number. Please enter a 10-digit phone number.",
        ));
    }
    match state.store.add_driver(&record).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Err(e) => error_json(&store_error(e)),
    }
}

async fn delete_driver(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let ctx = client_context(&state, &headers);
    if let Err(resp) = require_admin(&ctx) { return resp; }
    match state.store.delete_driver(&id).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status":"ok"}))),
        Ok(false) => error_json(&AppError::not_found("unknown_driver", "No such driver")),
        Err(e) => error_json(&store_error(e)),
    }
}
