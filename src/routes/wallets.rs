use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ApiResult, AppState, Body, Created, Params},
    middleware::AuthUser,
    models::{Withdrawal, WalletTransaction},
    services::wallets::{self, Balance, WithdrawalInput},
};

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    to_user_id: String,
    amount_cents: i64,
    description: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(balance))
        .route("/wallet/transactions", get(transactions))
        .route("/wallet/transfer", post(transfer))
        .route("/wallet/withdrawals", post(request_withdrawal))
}

async fn balance(State(state): State<AppState>, user: AuthUser) -> ApiResult<Balance> {
    ok(wallets::balance(&state.db, user.id()).await?)
}

async fn transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Params(query): Params<TransactionQuery>,
) -> ApiResult<Vec<WalletTransaction>> {
    ok(wallets::transactions(&state.db, user.id(), query.limit).await?)
}

async fn transfer(
    State(state): State<AppState>,
    user: AuthUser,
    Body(request): Body<TransferRequest>,
) -> ApiResult<WalletTransaction> {
    ok(wallets::transfer(
        &state.db,
        user.id(),
        &request.to_user_id,
        request.amount_cents,
        request.description,
    )
    .await?)
}

async fn request_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<WithdrawalInput>,
) -> Created<Withdrawal> {
    created(wallets::request_withdrawal(&state.db, user.id(), input).await?)
}
