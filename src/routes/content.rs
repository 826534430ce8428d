use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ok_with_message, ApiResult, AppState, Body, Created, Params},
    middleware::{AuthUser, MaybeUser},
    models::{Comment, Content, Page, PageParams},
    services::{
        comments::{self, AddCommentInput, CommentFilters},
        content::{self, ContentPatch, CreateContentInput, LikeResult},
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct ViewRequest {
    watch_secs: Option<f64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/content", post(create))
        .route("/content/hashtag/:tag", get(by_hashtag))
        .route("/content/:id", get(fetch).put(update).delete(remove))
        .route("/content/:id/like", post(like).delete(unlike))
        .route("/content/:id/share", post(share))
        .route("/content/:id/view", post(view))
        .route("/content/:id/comments", get(list_comments).post(add_comment))
        .route("/comments/:id", delete(delete_comment))
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<CreateContentInput>,
) -> Created<Content> {
    created(content::create(&state.db, &state.cache, user.id(), input).await?)
}

async fn fetch(State(state): State<AppState>, viewer: MaybeUser, Path(id): Path<String>) -> ApiResult<Content> {
    ok(content::get(&state.db, &id, viewer.0.as_ref()).await?)
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(patch): Body<ContentPatch>,
) -> ApiResult<Content> {
    ok(content::update(&state.db, &id, &user.0, patch).await?)
}

async fn remove(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    content::delete(&state.db, &state.cache, &id, &user.0).await?;
    ok_with_message((), "Content deleted")
}

async fn by_hashtag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Content>> {
    ok(content::by_hashtag(&state.db, &tag, &page).await?)
}

async fn like(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<LikeResult> {
    ok(content::like(&state.db, &id, &user.0).await?)
}

async fn unlike(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<LikeResult> {
    ok(content::unlike(&state.db, &id, &user.0).await?)
}

async fn share(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<u64> {
    ok(content::share(&state.db, &id, &user.0).await?)
}

async fn view(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
    body: Option<Body<ViewRequest>>,
) -> ApiResult<u64> {
    let watch_secs = body.and_then(|Body(request)| request.watch_secs);
    ok(content::record_view(&state.db, &id, viewer.0.as_ref(), watch_secs).await?)
}

async fn list_comments(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
    Params(filters): Params<CommentFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Comment>> {
    ok(comments::list(&state.db, &id, viewer.0.as_ref(), &filters, &page).await?)
}

async fn add_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(input): Body<AddCommentInput>,
) -> Created<Comment> {
    created(comments::add(&state.db, &id, &user.0, input).await?)
}

async fn delete_comment(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    comments::delete(&state.db, &id, &user.0).await?;
    ok_with_message((), "Comment deleted")
}
