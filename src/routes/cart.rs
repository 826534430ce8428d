use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{ok, ApiResult, AppState, Body},
    middleware::AuthUser,
    services::{
        cart::{self, AddItemInput, ApplyCouponInput, CartSummary, CartView, UpdateItemInput},
        coupons::{self, AppliedCoupon},
    },
};

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    code: String,
    subtotal_cents: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cart", get(fetch).delete(clear))
        .route("/cart/summary", get(summary))
        .route("/cart/items", post(add_item))
        .route("/cart/items/:product_id", put(update_item).delete(remove_item))
        .route("/cart/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/coupons/validate", post(validate_coupon))
}

async fn fetch(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    ok(cart::get(&state.db, user.id()).await?)
}

async fn clear(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    ok(cart::clear(&state.db, user.id()).await?)
}

async fn summary(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartSummary> {
    ok(cart::summary(&state.db, user.id()).await?)
}

async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<AddItemInput>,
) -> ApiResult<CartView> {
    ok(cart::add_item(&state.db, user.id(), input).await?)
}

async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
    Body(input): Body<UpdateItemInput>,
) -> ApiResult<CartView> {
    ok(cart::update_item(&state.db, user.id(), &product_id, input.quantity).await?)
}

async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
) -> ApiResult<CartView> {
    ok(cart::remove_item(&state.db, user.id(), &product_id).await?)
}

async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<ApplyCouponInput>,
) -> ApiResult<CartView> {
    ok(cart::apply_coupon(&state.db, user.id(), &input.code).await?)
}

async fn remove_coupon(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    ok(cart::remove_coupon(&state.db, user.id()).await?)
}

async fn validate_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Body(request): Body<ValidateCouponRequest>,
) -> ApiResult<AppliedCoupon> {
    ok(coupons::validate(&state.db, &request.code, user.id(), request.subtotal_cents).await?)
}
