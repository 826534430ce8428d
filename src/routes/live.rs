use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ApiResult, AppState, Body, Created, Params},
    middleware::{AuthUser, MaybeUser},
    models::{LiveStream, Page, PageParams},
    services::live::{self, CreateLiveInput, LiveFilters, ViewerUpdate},
};

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    product_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live", get(list).post(create))
        .route("/live/:id", get(fetch))
        .route("/live/:id/start", post(start))
        .route("/live/:id/end", post(end))
        .route("/live/:id/join", post(join))
        .route("/live/:id/leave", post(leave))
        .route("/live/:id/like", post(like))
        .route("/live/:id/products", post(pin_product))
}

async fn list(
    State(state): State<AppState>,
    Params(filters): Params<LiveFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<LiveStream>> {
    ok(live::list_live(&state.db, &filters, &page).await?)
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<CreateLiveInput>,
) -> Created<LiveStream> {
    created(live::create(&state.db, &user.0, input).await?)
}

async fn fetch(State(state): State<AppState>, viewer: MaybeUser, Path(id): Path<String>) -> ApiResult<LiveStream> {
    ok(live::get(&state.db, &id, viewer.0.as_ref()).await?)
}

async fn start(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<LiveStream> {
    ok(live::start(&state.db, &id, user.id()).await?)
}

async fn end(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<LiveStream> {
    ok(live::end(&state.db, &id, &user.0).await?)
}

async fn join(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<ViewerUpdate> {
    ok(live::join(&state.db, &id, &user.0).await?)
}

async fn leave(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<ViewerUpdate> {
    ok(live::leave(&state.db, &id, user.id()).await?)
}

async fn like(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<u64> {
    ok(live::like(&state.db, &id, &user.0).await?)
}

async fn pin_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(request): Body<PinRequest>,
) -> ApiResult<LiveStream> {
    ok(live::pin_product(&state.db, &id, user.id(), &request.product_id).await?)
}
