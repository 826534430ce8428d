use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{ok, ApiResult, AppState, Body, Params},
    middleware::{AuthUser, MaybeUser},
    models::{Content, LiveStream, Page, PageParams, UserProfile},
    services::{
        content, live,
        users::{self, FollowResult, ProfilePatch, ProfileView, MAX_SEARCH_RESULTS},
    },
};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/search", get(search))
        .route("/users/me", put(update_me))
        .route("/users/username/:username", get(by_username))
        .route("/users/:id", get(profile))
        .route("/users/:id/follow", post(follow).delete(unfollow))
        .route("/users/:id/followers", get(followers))
        .route("/users/:id/following", get(following))
        .route("/users/:id/content", get(user_content))
        .route("/users/:id/live", get(user_streams))
}

async fn search(State(state): State<AppState>, Params(query): Params<SearchQuery>) -> ApiResult<Vec<UserProfile>> {
    let limit = query.limit.unwrap_or(20).min(MAX_SEARCH_RESULTS);
    ok(users::search(&state.db, &query.q, limit).await?)
}

async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Body(patch): Body<ProfilePatch>,
) -> ApiResult<UserProfile> {
    ok(users::update_profile(&state.db, user.id(), patch).await?)
}

async fn by_username(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(username): Path<String>,
) -> ApiResult<ProfileView> {
    ok(users::get_by_username(&state.db, &username, viewer.id()).await?)
}

async fn profile(State(state): State<AppState>, viewer: MaybeUser, Path(id): Path<String>) -> ApiResult<ProfileView> {
    ok(users::get_profile(&state.db, &id, viewer.id()).await?)
}

async fn follow(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<FollowResult> {
    ok(users::follow(&state.db, &state.cache, user.id(), &id).await?)
}

async fn unfollow(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<FollowResult> {
    ok(users::unfollow(&state.db, &state.cache, user.id(), &id).await?)
}

async fn followers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<UserProfile>> {
    ok(users::followers(&state.db, &id, &page).await?)
}

async fn following(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<UserProfile>> {
    ok(users::following(&state.db, &id, &page).await?)
}

async fn user_content(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Content>> {
    ok(content::list_by_user(&state.db, &id, viewer.0.as_ref(), &page).await?)
}

async fn user_streams(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<LiveStream>> {
    ok(live::list_by_host(&state.db, &id, viewer.0.as_ref(), &page).await?)
}
