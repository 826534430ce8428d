use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::Utc;

use crate::{
    api::AppState,
    error::{AppError, AppResult},
    models::User,
    services::auth::{ensure_can_sign_in, TokenType},
};

/// Authenticated caller, loaded fresh from the store on every request.
///
/// Rejects with `NO_TOKEN`, `INVALID_TOKEN`, `TOKEN_EXPIRED`, `USER_NOT_FOUND`,
/// `ACCOUNT_BANNED` or `ACCOUNT_SUSPENDED`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn is_admin(&self) -> bool {
        self.0.role.is_admin()
    }

    pub fn require_seller(&self) -> AppResult<()> {
        if !self.0.role.is_seller() {
            return Err(AppError::forbidden(
                "SELLER_REQUIRED",
                "Seller account required",
            ));
        }
        Ok(())
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

async fn authenticate(parts: &Parts, state: &AppState) -> AppResult<User> {
    let token = bearer_token(parts)
        .ok_or_else(|| AppError::unauthorized("NO_TOKEN", "No token provided"))?;

    let claims = state
        .tokens
        .verify(token, TokenType::Access, Utc::now().timestamp())?;

    let user = state
        .db
        .get::<User>(&claims.sub)
        .await?
        .ok_or(AppError::UserNotFound)?;

    ensure_can_sign_in(&user)?;
    Ok(user)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = authenticate(parts, state).await?;
        Ok(AuthUser(user))
    }
}

/// Authenticated admin or superadmin; rejects others with `ADMIN_REQUIRED`
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            return Err(AppError::forbidden("ADMIN_REQUIRED", "Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

/// Caller if a valid token for an active account was sent; never rejects
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|u| u.id.as_str())
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            return Ok(MaybeUser(None));
        }
        match authenticate(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid optional credentials");
                Ok(MaybeUser(None))
            }
        }
    }
}
