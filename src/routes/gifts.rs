use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ApiResult, AppState, Body, Created, Params},
    middleware::{AdminUser, AuthUser},
    models::{Gift, GiftStatus, Page, PageParams},
    services::gifts::{self, CreateGiftInput, GiftFilters, GiftReceipt, SendGiftInput, Supporter},
};

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GiftStatusRequest {
    status: GiftStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/gifts", get(catalog))
        .route("/gifts/popular", get(popular))
        .route("/live/:id/gifts", post(send))
        .route("/live/:id/supporters", get(supporters))
        .route("/admin/gifts", post(create))
        .route("/admin/gifts/:id/status", put(set_status))
}

async fn catalog(
    State(state): State<AppState>,
    Params(filters): Params<GiftFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Gift>> {
    ok(gifts::catalog(&state.db, &filters, &page).await?)
}

async fn popular(State(state): State<AppState>, Params(query): Params<LimitQuery>) -> ApiResult<Vec<Gift>> {
    ok(gifts::popular(&state.db, query.limit).await?)
}

async fn send(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(input): Body<SendGiftInput>,
) -> Created<GiftReceipt> {
    created(gifts::send(&state.db, &user.0, &id, input).await?)
}

async fn supporters(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Params(query): Params<LimitQuery>,
) -> ApiResult<Vec<Supporter>> {
    ok(gifts::top_supporters(&state.db, &id, query.limit.unwrap_or(10)).await?)
}

async fn create(
    State(state): State<AppState>,
    _admin: AdminUser,
    Body(input): Body<CreateGiftInput>,
) -> Created<Gift> {
    created(gifts::create_gift(&state.db, input).await?)
}

async fn set_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<GiftStatusRequest>,
) -> ApiResult<Gift> {
    ok(gifts::set_status(&state.db, &id, request.status).await?)
}
