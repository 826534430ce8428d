use axum::{extract::State, routing::get, Router};
use serde::Deserialize;

use crate::{
    api::{ok, ApiResult, AppState, Params},
    middleware::{AuthUser, MaybeUser},
    models::{Content, Page, PageParams},
    services::{
        feed::{self, FeedPage, FeedRequest},
        recommendations::{self, RecommendationQuery, Recommendations},
    },
};

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    hours: Option<u32>,
    limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed", get(personal))
        .route("/feed/trending", get(trending))
        .route("/feed/following", get(following))
        .route("/recommendations", get(recommend))
}

async fn personal(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Params(request): Params<FeedRequest>,
) -> ApiResult<FeedPage> {
    ok(feed::generate_feed(&state.db, &state.cache, viewer.id(), &request).await?)
}

async fn trending(State(state): State<AppState>, Params(query): Params<TrendingQuery>) -> ApiResult<Vec<Content>> {
    let hours = query.hours.unwrap_or(24);
    let limit = query.limit.unwrap_or(feed::DEFAULT_FEED_LIMIT);
    ok(feed::trending(&state.db, &state.cache, hours, limit).await?)
}

async fn following(
    State(state): State<AppState>,
    user: AuthUser,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Content>> {
    ok(feed::following_feed(&state.db, user.id(), &page).await?)
}

async fn recommend(
    State(state): State<AppState>,
    user: AuthUser,
    Params(query): Params<RecommendationQuery>,
) -> ApiResult<Recommendations> {
    ok(recommendations::recommend(&state.db, &state.cache, user.id(), query.limit).await?)
}
