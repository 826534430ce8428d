use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ok_with_message, ApiResult, AppState, Body, Created, Params},
    middleware::{AdminUser, AuthUser},
    models::{Page, PageParams, QueueItem, Report, ReportStatus},
    services::moderation::{
        self, CompleteInput, EnqueueInput, QueueFilters, QueueStats, ReportInput, ReportReceipt,
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct ReportFilters {
    status: Option<ReportStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    moderator_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    reason: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reports", post(report))
        .route("/admin/moderation/queue", get(list).post(enqueue))
        .route("/admin/moderation/next", post(next))
        .route("/admin/moderation/stats", get(stats))
        .route("/admin/moderation/reports", get(list_reports))
        .route("/admin/moderation/:id/assign", post(assign))
        .route("/admin/moderation/:id/start", post(start_review))
        .route("/admin/moderation/:id/complete", post(complete))
        .route("/admin/moderation/:id/escalate", post(escalate))
}

async fn report(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<ReportInput>,
) -> Created<ReportReceipt> {
    created(moderation::report(&state.db, &user.0, input).await?)
}

async fn list(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(filters): Params<QueueFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<QueueItem>> {
    ok(moderation::list(&state.db, &filters, &page).await?)
}

async fn enqueue(
    State(state): State<AppState>,
    _admin: AdminUser,
    Body(input): Body<EnqueueInput>,
) -> Created<QueueItem> {
    created(moderation::enqueue(&state.db, input).await?)
}

async fn next(State(state): State<AppState>, AdminUser(admin): AdminUser) -> ApiResult<Option<QueueItem>> {
    match moderation::next(&state.db, &admin.id).await? {
        Some(item) => ok(Some(item)),
        None => ok_with_message(None, "Queue is empty"),
    }
}

async fn stats(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<QueueStats> {
    ok(moderation::stats(&state.db).await?)
}

async fn list_reports(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(filters): Params<ReportFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Report>> {
    ok(moderation::list_reports(&state.db, filters.status, &page).await?)
}

/// Assigns to the named moderator, or to the caller when none is given
async fn assign(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Body(request): Body<AssignRequest>,
) -> ApiResult<QueueItem> {
    let moderator_id = request.moderator_id.unwrap_or(admin.id);
    ok(moderation::assign(&state.db, &id, &moderator_id).await?)
}

async fn start_review(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> ApiResult<QueueItem> {
    ok(moderation::start_review(&state.db, &id, &admin.id).await?)
}

async fn complete(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Body(input): Body<CompleteInput>,
) -> ApiResult<QueueItem> {
    ok(moderation::complete(&state.db, &id, &admin, input).await?)
}

async fn escalate(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<EscalateRequest>,
) -> ApiResult<QueueItem> {
    ok(moderation::escalate(&state.db, &id, &request.reason).await?)
}
