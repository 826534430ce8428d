use axum::{
    extract::{Path, State},
    routing::{delete, get, put},
    Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::{
    api::{created, ok, ok_with_message, ApiResult, AppState, Body, Created, Params},
    middleware::{AdminUser, AuthUser},
    models::{Notification, NotificationCampaign, Page, PageParams},
    services::notifications::{self, Inbox, InboxFilters, NotificationStats, SendNotificationInput},
};

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    count: usize,
}

#[derive(Debug, Serialize)]
pub struct Marked {
    marked: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(inbox))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", put(read_all))
        .route("/notifications/:id/read", put(mark_read))
        .route("/notifications/:id", delete(remove))
        .route("/admin/notifications", get(history).post(send))
        .route("/admin/notifications/stats", get(stats))
}

async fn inbox(
    State(state): State<AppState>,
    user: AuthUser,
    Params(filters): Params<InboxFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Inbox> {
    ok(notifications::inbox(&state.db, user.id(), &filters, &page).await?)
}

async fn unread_count(State(state): State<AppState>, user: AuthUser) -> ApiResult<UnreadCount> {
    let count = notifications::unread_count(&state.db, user.id()).await?;
    ok(UnreadCount { count })
}

async fn read_all(State(state): State<AppState>, user: AuthUser) -> ApiResult<Marked> {
    let marked = notifications::mark_all_read(&state.db, user.id()).await?;
    ok_with_message(Marked { marked }, "All notifications marked as read")
}

async fn mark_read(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<Notification> {
    ok(notifications::mark_read(&state.db, &id, user.id()).await?)
}

async fn remove(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    notifications::delete(&state.db, &id, user.id()).await?;
    ok_with_message((), "Notification deleted")
}

async fn send(
    State(state): State<AppState>,
    admin: AdminUser,
    Body(input): Body<SendNotificationInput>,
) -> Created<NotificationCampaign> {
    created(notifications::send(&state.db, &admin.0, input).await?)
}

async fn history(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<NotificationCampaign>> {
    ok(notifications::history(&state.db, &page).await?)
}

async fn stats(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<NotificationStats> {
    ok(notifications::stats(&state.db, Utc::now()).await?)
}
