//! Account registration, login and token lifecycle.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::{
    db::{with_retry, Db, Query},
    error::{AppError, AppResult},
    models::{
        new_id, Privacy, Role, User, UserKey, UserProfile, UserStats, UserStatus, Wallet,
    },
};

pub mod jwt;
pub mod password;

pub use jwt::{Claims, TokenKeys, TokenPair, TokenType};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    /// Email or username
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
    })
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{3,30}$").expect("username pattern is valid"))
}

/// Lowercases and validates an email address
pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if !email_pattern().is_match(&email) {
        return Err(AppError::invalid("Invalid email address"));
    }
    Ok(email)
}

pub fn validate_username(username: &str) -> AppResult<()> {
    if !username_pattern().is_match(username) {
        return Err(AppError::invalid(
            "Username must be 3-30 characters of letters, numbers and underscores",
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Rejects accounts that may not act (login, token refresh, authenticated calls)
pub fn ensure_can_sign_in(user: &User) -> AppResult<()> {
    match user.status {
        UserStatus::Active => Ok(()),
        UserStatus::Banned => Err(AppError::forbidden(
            "ACCOUNT_BANNED",
            "Account has been banned",
        )),
        UserStatus::Suspended => Err(AppError::forbidden(
            "ACCOUNT_SUSPENDED",
            "Account has been suspended",
        )),
        UserStatus::Inactive => Err(AppError::forbidden(
            "ACCOUNT_INACTIVE",
            "Account is inactive",
        )),
    }
}

async fn find_by_email(db: &Db, email: &str) -> AppResult<Option<User>> {
    db.find_one(Query::new().eq("email", email)).await
}

async fn find_by_username(db: &Db, username: &str) -> AppResult<Option<User>> {
    db.find_one(Query::new().eq("username_lower", username.to_lowercase()))
        .await
}

/// Creates an account and its wallet and signs the user in
pub async fn register(
    db: &Db,
    keys: &TokenKeys,
    password_rounds: u32,
    input: RegisterInput,
) -> AppResult<AuthResponse> {
    // 1. Validate input
    let email = normalize_email(&input.email)?;
    let username = input.username.trim().to_string();
    validate_username(&username)?;
    validate_password(&input.password)?;
    let full_name = input.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(AppError::invalid("Full name is required"));
    }

    // 2. Friendly uniqueness errors; the key documents below enforce it
    if find_by_email(db, &email).await?.is_some() {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }
    if find_by_username(db, &username).await?.is_some() {
        return Err(AppError::Conflict("Username is already taken".to_string()));
    }

    // 3. User, uniqueness keys and wallet in one commit
    let now = Utc::now();
    let user = User {
        id: new_id(),
        email: email.clone(),
        username_lower: username.to_lowercase(),
        username,
        full_name,
        bio: String::new(),
        avatar: None,
        website: None,
        role: Role::User,
        status: UserStatus::Active,
        status_reason: None,
        is_verified: false,
        stats: UserStats::default(),
        privacy: Privacy::default(),
        strike_count: 0,
        token_version: 0,
        password_hash: password::hash_password(&input.password, password_rounds),
        last_login_at: Some(now),
        created_at: now,
        updated_at: now,
    };

    let mut batch = db.batch();
    batch.insert(&user)?;
    batch.insert(&UserKey::email(&user.email, &user.id))?;
    batch.insert(&UserKey::username(&user.username_lower, &user.id))?;
    batch.insert(&Wallet::new(&user.id))?;
    batch.commit().await.map_err(|e| match e {
        AppError::WriteConflict(_) => {
            AppError::Conflict("Email or username is already in use".to_string())
        }
        other => other,
    })?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    let tokens = keys.issue_pair(&user, now.timestamp())?;
    Ok(AuthResponse {
        user: user.private_profile(),
        tokens,
    })
}

/// Signs in with email or username
pub async fn login(
    db: &Db,
    keys: &TokenKeys,
    password_rounds: u32,
    input: LoginInput,
) -> AppResult<AuthResponse> {
    let invalid = || AppError::unauthorized("INVALID_CREDENTIALS", "Invalid credentials");

    let identifier = input.identifier.trim();
    if identifier.is_empty() || input.password.is_empty() {
        return Err(AppError::invalid("Identifier and password are required"));
    }

    let user = if identifier.contains('@') {
        find_by_email(db, &identifier.to_lowercase()).await?
    } else {
        find_by_username(db, identifier).await?
    };
    let Some(user) = user else {
        // same key derivation as a real check so a miss costs as much as a hit
        password::burn_verification(&input.password, password_rounds);
        return Err(invalid());
    };

    if !password::verify_password(&input.password, &user.password_hash)? {
        tracing::warn!(user_id = %user.id, "Failed login attempt");
        return Err(invalid());
    }
    ensure_can_sign_in(&user)?;

    let user = with_retry("login", || async {
        let mut current = db.require::<User>(&user.id).await?;
        current.last_login_at = Some(Utc::now());
        db.update(&current).await?;
        Ok(current.into_inner())
    })
    .await?;

    tracing::info!(user_id = %user.id, "User logged in");

    let tokens = keys.issue_pair(&user, Utc::now().timestamp())?;
    Ok(AuthResponse {
        user: user.private_profile(),
        tokens,
    })
}

/// Exchanges a refresh token for a new pair
pub async fn refresh(db: &Db, keys: &TokenKeys, refresh_token: &str) -> AppResult<TokenPair> {
    let now = Utc::now().timestamp();
    let claims = keys.verify(refresh_token, TokenType::Refresh, now)?;

    let user = db
        .get::<User>(&claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("INVALID_TOKEN", "Invalid token"))?;

    if claims.ver != user.token_version {
        return Err(AppError::unauthorized(
            "INVALID_TOKEN",
            "Token has been revoked",
        ));
    }
    ensure_can_sign_in(&user)?;

    keys.issue_pair(&user, now)
}

/// Revokes every outstanding refresh token of the user
pub async fn logout(db: &Db, user_id: &str) -> AppResult<()> {
    with_retry("logout", || async {
        let mut user = db.require::<User>(user_id).await?;
        user.token_version += 1;
        user.updated_at = Utc::now();
        db.update(&user).await
    })
    .await?;

    tracing::info!(user_id, "User logged out");
    Ok(())
}

/// Replaces the password, revoking old tokens and issuing fresh ones
pub async fn change_password(
    db: &Db,
    keys: &TokenKeys,
    password_rounds: u32,
    user_id: &str,
    current_password: &str,
    new_password: &str,
) -> AppResult<TokenPair> {
    validate_password(new_password)?;
    if current_password == new_password {
        return Err(AppError::invalid(
            "New password must differ from the current password",
        ));
    }

    let new_hash = password::hash_password(new_password, password_rounds);
    let user = with_retry("change_password", || async {
        let mut user = db.require::<User>(user_id).await?;
        if !password::verify_password(current_password, &user.password_hash)? {
            return Err(AppError::unauthorized(
                "INVALID_CREDENTIALS",
                "Current password is incorrect",
            ));
        }
        user.password_hash = new_hash.clone();
        user.token_version += 1;
        user.updated_at = Utc::now();
        db.update(&user).await?;
        Ok(user.into_inner())
    })
    .await?;

    tracing::info!(user_id, "Password changed");
    keys.issue_pair(&user, Utc::now().timestamp())
}

pub async fn me(db: &Db, user_id: &str) -> AppResult<UserProfile> {
    Ok(db.require::<User>(user_id).await?.private_profile())
}
