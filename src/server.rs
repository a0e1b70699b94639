use std::future::Future;
use std::path::Path;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::cache;
use crate::fetcher::{now_unix, published_within, Fetcher};
use crate::views::{render_comments, render_error, render_index, DEFAULT_FILTER};

const CONTENT_SECURITY_POLICY: &str =
    "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'";

lazy_static! {
    static ref STORY_ID: Regex = Regex::new(r"^\d+$").unwrap();
}

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Fetcher,
}

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub filter: Option<String>,
}

pub fn router(fetcher: Fetcher, static_dir: impl AsRef<Path>) -> Router {
    let state = AppState { fetcher };

    Router::new()
        .route("/", get(index))
        .route("/comments/{id}", get(comments))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/cache-status", get(cache_status))
        .nest_service("/static", ServeDir::new(static_dir.as_ref()))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=15552000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("same-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_DNS_PREFETCH_CONTROL,
            HeaderValue::from_static("off"),
        ))
}

/// Serves until `shutdown` resolves, then lets in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down gracefully"),
        _ = terminate => info!("SIGTERM received, shutting down gracefully"),
    }
}

/// Story ids are plain positive decimal numbers.
pub fn parse_story_id(raw: &str) -> Option<u64> {
    if !STORY_ID.is_match(raw) {
        return None;
    }
    raw.parse::<u64>().ok().filter(|id| *id > 0)
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn error_page(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Html(render_error(error, message))).into_response()
}

async fn index(State(state): State<AppState>, Query(query): Query<IndexQuery>) -> Html<String> {
    let stories = state.fetcher.all_stories().await;
    let now = now_unix();
    let recent = published_within(&stories, state.fetcher.settings().recent_window, now);
    info!(count = recent.len(), "serving recent stories");

    let filter = query.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    Html(render_index(&recent, filter, now))
}

async fn comments(State(state): State<AppState>, UrlPath(raw_id): UrlPath<String>) -> Response {
    let Some(story_id) = parse_story_id(&raw_id) else {
        return error_page(
            StatusCode::BAD_REQUEST,
            "Invalid story ID",
            "The requested story could not be found.",
        );
    };

    match state.fetcher.comments_for_story(story_id).await {
        Ok(thread) => Html(render_comments(&thread, now_unix())).into_response(),
        Err(err) if err.is_not_found() => error_page(
            StatusCode::NOT_FOUND,
            "Story not found",
            "The requested story could not be found.",
        ),
        Err(err) => {
            error!(story_id, error = %err, "error in comments route");
            error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server Error",
                "Unable to load comments. Please try again later.",
            )
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": iso_now() }))
}

async fn ready(State(state): State<AppState>) -> Json<Value> {
    let (size, max_size) = {
        let store = cache::lock(state.fetcher.cache());
        (store.len(), store.max_entries())
    };
    Json(json!({
        "status": "ready",
        "cache": { "size": size, "maxSize": max_size },
        "timestamp": iso_now(),
    }))
}

async fn cache_status(State(state): State<AppState>) -> Json<cache::CacheStatus> {
    Json(cache::lock(state.fetcher.cache()).status())
}

async fn not_found() -> Response {
    error_page(
        StatusCode::NOT_FOUND,
        "Page Not Found",
        "The page you are looking for does not exist.",
    )
}
