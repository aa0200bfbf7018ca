use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::db::{Database, ItemStatus, PageItem};
use crate::worker::RefreshHandle;

const ITEMS_PER_PAGE: i64 = 5;

pub struct AppState {
    pub db: Arc<Database>,
    pub refresh: RefreshHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/unread", get(unread))
        .route("/read", get(read))
        .route("/items/:id/read", post(mark_read))
        .route("/items/:id/unread", post(mark_unread))
        .route("/refresh", post(refresh))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Template)]
#[template(path = "items.html")]
pub struct ItemsTemplate {
    pub status: ItemStatus,
    pub items: Vec<PageItem>,
    pub page: i64,
    pub has_prev: bool,
    pub has_next: bool,
}

impl PageItem {
    pub fn published_display(&self) -> String {
        self.published_at
            .map(|p| p.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default()
    }
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_string(),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    /// Zero-based page number; anything unparsable means the first page.
    fn page(&self) -> i64 {
        match self.page.as_deref() {
            None | Some("") => 0,
            Some(raw) => match raw.parse::<i64>() {
                Ok(page) => page.max(0),
                Err(_) => {
                    warn!(page = raw, "Unable to parse page");
                    0
                }
            },
        }
    }
}

pub async fn index() -> Redirect {
    Redirect::permanent("/unread")
}

pub async fn unread(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    list_page(&state.db, ItemStatus::Unread, query.page()).await
}

pub async fn read(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    list_page(&state.db, ItemStatus::Read, query.page()).await
}

async fn list_page(
    db: &Database,
    status: ItemStatus,
    page: i64,
) -> Result<HtmlTemplate<ItemsTemplate>, AppError> {
    let offset = page.saturating_mul(ITEMS_PER_PAGE);
    let items = db.list_items(status, ITEMS_PER_PAGE, offset).await?;
    let total = db.count_items(status).await?;

    Ok(HtmlTemplate(ItemsTemplate {
        status,
        items,
        page,
        has_prev: page > 0,
        has_next: offset.saturating_add(ITEMS_PER_PAGE) < total,
    }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    set_status(&state.db, item_id, ItemStatus::Read).await
}

pub async fn mark_unread(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    set_status(&state.db, item_id, ItemStatus::Unread).await
}

async fn set_status(
    db: &Database,
    item_id: i64,
    status: ItemStatus,
) -> Result<StatusCode, AppError> {
    if db.set_item_status(item_id, status).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let message = if state.refresh.trigger() {
        "refresh queued"
    } else {
        "refresh already pending"
    };
    (StatusCode::ACCEPTED, message)
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
