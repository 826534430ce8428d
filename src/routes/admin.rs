//! Admin-only surface. Every handler takes [`AdminUser`], so non-admins get
//! `ADMIN_REQUIRED` before any work happens.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;

use crate::{
    api::{created, ok, ApiResult, AppState, Body, Created, Params},
    middleware::AdminUser,
    models::{
        Comment, CommentStatus, Content, ContentStatus, Coupon, Order, Page, PageParams, Product,
        ProductStatus, Role, Store, StoreStatus, UserProfile, UserStatus, Wallet,
        WalletStatus, WalletTransaction, Withdrawal, WithdrawalStatus,
    },
    services::{
        admin::{self, Dashboard},
        comments, content,
        coupons::{self, CreateCouponInput},
        orders::{self, OrderStats, PaymentUpdateInput},
        stores,
        users::{self, UserFilters},
        wallets::{self, WalletFilters, WalletStats},
    },
};

#[derive(Debug, Deserialize)]
pub struct UserStatusRequest {
    status: UserStatus,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    role: Role,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest<S> {
    status: S,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    amount_cents: i64,
    description: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalDecision {
    decision: WithdrawalStatus,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WithdrawalFilters {
    status: Option<WithdrawalStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/status", put(set_user_status))
        .route("/admin/users/:id/role", put(set_role))
        .route("/admin/users/:id/verify", put(set_verified))
        .route("/admin/content/:id/status", put(set_content_status))
        .route("/admin/comments/:id/status", put(set_comment_status))
        .route("/admin/products/:id/status", put(set_product_status))
        .route("/admin/stores/:id/status", put(set_store_status))
        .route("/admin/wallets", get(list_wallets))
        .route("/admin/wallets/stats", get(wallet_stats))
        .route("/admin/wallets/:user_id/status", put(set_wallet_status))
        .route("/admin/wallets/:user_id/deposit", post(deposit))
        .route("/admin/wallets/:user_id/deduct", post(deduct))
        .route("/admin/withdrawals", get(list_withdrawals))
        .route("/admin/withdrawals/:id", put(process_withdrawal))
        .route("/admin/coupons", get(list_coupons).post(create_coupon))
        .route("/admin/coupons/:code", delete(deactivate_coupon))
        .route("/admin/orders/stats", get(order_stats))
        .route("/admin/orders/:id/payment", put(update_payment))
}

async fn dashboard(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Dashboard> {
    ok(admin::dashboard(&state.db).await?)
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(filters): Params<UserFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<UserProfile>> {
    ok(users::list_users(&state.db, &filters, &page).await?)
}

async fn set_user_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Body(request): Body<UserStatusRequest>,
) -> ApiResult<UserProfile> {
    ok(users::set_status(&state.db, &admin, &id, request.status, request.reason).await?)
}

async fn set_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Body(request): Body<RoleRequest>,
) -> ApiResult<UserProfile> {
    ok(users::set_role(&state.db, &admin, &id, request.role).await?)
}

async fn set_verified(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<VerifyRequest>,
) -> ApiResult<UserProfile> {
    ok(users::set_verified(&state.db, &id, request.verified).await?)
}

async fn set_content_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<StatusRequest<ContentStatus>>,
) -> ApiResult<Content> {
    ok(content::set_status(&state.db, &id, request.status).await?)
}

async fn set_comment_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<StatusRequest<CommentStatus>>,
) -> ApiResult<Comment> {
    ok(comments::set_status(&state.db, &id, request.status).await?)
}

async fn set_product_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<StatusRequest<ProductStatus>>,
) -> ApiResult<Product> {
    ok(stores::set_product_status(&state.db, &id, request.status).await?)
}

async fn set_store_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<StatusRequest<StoreStatus>>,
) -> ApiResult<Store> {
    ok(stores::set_store_status(&state.db, &id, request.status).await?)
}

async fn list_wallets(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(filters): Params<WalletFilters>,
) -> ApiResult<Vec<Wallet>> {
    ok(wallets::list_wallets(&state.db, &filters).await?)
}

async fn wallet_stats(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<WalletStats> {
    ok(wallets::stats(&state.db).await?)
}

async fn set_wallet_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<String>,
    Body(request): Body<StatusRequest<WalletStatus>>,
) -> ApiResult<Wallet> {
    ok(wallets::set_status(&state.db, &user_id, request.status).await?)
}

async fn deposit(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Body(request): Body<AdjustRequest>,
) -> Created<WalletTransaction> {
    tracing::info!(admin_id = %admin.id, user_id = %user_id, "Admin wallet deposit");
    created(
        wallets::deposit(
            &state.db,
            &user_id,
            request.amount_cents,
            request.description,
            request.source,
        )
        .await?,
    )
}

async fn deduct(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Body(request): Body<AdjustRequest>,
) -> Created<WalletTransaction> {
    tracing::info!(admin_id = %admin.id, user_id = %user_id, "Admin wallet deduction");
    created(wallets::deduct(&state.db, &user_id, request.amount_cents, request.description).await?)
}

async fn list_withdrawals(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(filters): Params<WithdrawalFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Withdrawal>> {
    ok(wallets::list_withdrawals(&state.db, filters.status, &page).await?)
}

async fn process_withdrawal(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(request): Body<WithdrawalDecision>,
) -> ApiResult<Withdrawal> {
    ok(wallets::process_withdrawal(&state.db, &id, request.decision, request.notes).await?)
}

async fn list_coupons(
    State(state): State<AppState>,
    _admin: AdminUser,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Coupon>> {
    ok(coupons::list(&state.db, &page).await?)
}

async fn create_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Body(input): Body<CreateCouponInput>,
) -> Created<Coupon> {
    created(coupons::create(&state.db, input).await?)
}

async fn deactivate_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(code): Path<String>,
) -> ApiResult<Coupon> {
    ok(coupons::deactivate(&state.db, &code).await?)
}

async fn order_stats(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<OrderStats> {
    ok(orders::stats(&state.db).await?)
}

async fn update_payment(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Body(input): Body<PaymentUpdateInput>,
) -> ApiResult<Order> {
    ok(orders::update_payment(&state.db, &id, input).await?)
}
