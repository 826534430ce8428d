use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ok_with_message, ApiResult, AppState, Body, Created},
    middleware::AuthUser,
    models::UserProfile,
    services::auth::{self, AuthResponse, LoginInput, RegisterInput, TokenPair},
};

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
}

async fn register(State(state): State<AppState>, Body(input): Body<RegisterInput>) -> Created<AuthResponse> {
    let response = auth::register(&state.db, &state.tokens, state.password_rounds(), input).await?;
    created(response)
}

async fn login(State(state): State<AppState>, Body(input): Body<LoginInput>) -> ApiResult<AuthResponse> {
    ok(auth::login(&state.db, &state.tokens, state.password_rounds(), input).await?)
}

async fn refresh(State(state): State<AppState>, Body(request): Body<RefreshRequest>) -> ApiResult<TokenPair> {
    ok(auth::refresh(&state.db, &state.tokens, &request.refresh_token).await?)
}

async fn logout(State(state): State<AppState>, user: AuthUser) -> ApiResult<()> {
    auth::logout(&state.db, user.id()).await?;
    ok_with_message((), "Logged out")
}

async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<UserProfile> {
    ok(auth::me(&state.db, user.id()).await?)
}

async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Body(request): Body<ChangePasswordRequest>,
) -> ApiResult<TokenPair> {
    let tokens = auth::change_password(
        &state.db,
        &state.tokens,
        state.password_rounds(),
        user.id(),
        &request.current_password,
        &request.new_password,
    )
    .await?;
    ok_with_message(tokens, "Password changed")
}
