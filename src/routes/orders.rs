use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Router,
};

use crate::{
    api::{created, ok, ApiResult, AppState, Body, Created, Params},
    error::AppError,
    middleware::AuthUser,
    models::{Order, Page, PageParams, Tracking},
    services::{
        orders::{
            self, AnalyticsQuery, CancelInput, CheckoutInput, CheckoutResult, OrderAnalytics,
            OrderFilters, RefundInput, StatusInfo, StatusUpdateInput,
        },
        stores::store_id_for,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list))
        .route("/orders/checkout", post(checkout))
        .route("/orders/statuses", get(statuses))
        .route("/orders/analytics", get(analytics))
        .route("/orders/:id", get(fetch))
        .route("/orders/:id/status", put(update_status))
        .route("/orders/:id/shipping", put(update_shipping))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/refund", post(refund))
}

async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<CheckoutInput>,
) -> Created<CheckoutResult> {
    created(orders::checkout(&state.db, &user.0, input).await?)
}

async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Params(filters): Params<OrderFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Order>> {
    ok(orders::list(&state.db, &user.0, &filters, &page).await?)
}

async fn statuses() -> ApiResult<Vec<StatusInfo>> {
    ok(orders::statuses())
}

/// Sellers only ever see their own store; admins may pick any store or none
async fn analytics(
    State(state): State<AppState>,
    user: AuthUser,
    Params(mut query): Params<AnalyticsQuery>,
) -> ApiResult<OrderAnalytics> {
    if !user.is_admin() {
        user.require_seller()?;
        let own = store_id_for(user.id());
        if query.store_id.as_ref().is_some_and(|id| *id != own) {
            return Err(AppError::forbidden(
                "ORDER_ACCESS_DENIED",
                "You can only view analytics for your own store",
            ));
        }
        query.store_id = Some(own);
    }
    ok(orders::analytics(&state.db, &query).await?)
}

async fn fetch(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<Order> {
    ok(orders::get(&state.db, &id, &user.0).await?)
}

async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(input): Body<StatusUpdateInput>,
) -> ApiResult<Order> {
    ok(orders::update_status(&state.db, &id, input, &user.0).await?)
}

async fn update_shipping(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(tracking): Body<Tracking>,
) -> ApiResult<Order> {
    ok(orders::update_shipping(&state.db, &id, tracking, &user.0).await?)
}

async fn cancel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(input): Body<CancelInput>,
) -> ApiResult<Order> {
    ok(orders::cancel(&state.db, &id, &input.reason, &user.0).await?)
}

async fn refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(input): Body<RefundInput>,
) -> ApiResult<Order> {
    ok(orders::refund(&state.db, &id, input, &user.0).await?)
}
