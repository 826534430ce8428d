use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};

use crate::{
    api::{created, ok, ok_with_message, ApiResult, AppState, Body, Created, Params},
    middleware::{AuthUser, MaybeUser},
    models::{Page, PageParams, Product, Store},
    services::stores::{
        self, CreateProductInput, CreateStoreInput, ProductFilters, ProductPatch,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stores", post(create_store))
        .route("/stores/me", get(my_store))
        .route("/stores/:id", get(get_store))
        .route("/products", get(list_products).post(create_product))
        .route("/products/low-stock", get(low_stock))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
}

async fn create_store(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<CreateStoreInput>,
) -> Created<Store> {
    user.require_seller()?;
    created(stores::create_store(&state.db, &user.0, input).await?)
}

async fn my_store(State(state): State<AppState>, user: AuthUser) -> ApiResult<Store> {
    ok(stores::my_store(&state.db, user.id()).await?)
}

async fn get_store(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Store> {
    ok(stores::get_store(&state.db, &id).await?)
}

async fn list_products(
    State(state): State<AppState>,
    Params(filters): Params<ProductFilters>,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<Product>> {
    ok(stores::list_products(&state.db, &filters, &page).await?)
}

async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<CreateProductInput>,
) -> Created<Product> {
    user.require_seller()?;
    created(stores::create_product(&state.db, &user.0, input).await?)
}

async fn low_stock(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<Product>> {
    user.require_seller()?;
    ok(stores::low_stock(&state.db, user.id()).await?)
}

async fn get_product(State(state): State<AppState>, viewer: MaybeUser, Path(id): Path<String>) -> ApiResult<Product> {
    ok(stores::get_product(&state.db, &id, viewer.0.as_ref()).await?)
}

async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(patch): Body<ProductPatch>,
) -> ApiResult<Product> {
    ok(stores::update_product(&state.db, &id, &user.0, patch).await?)
}

async fn delete_product(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    stores::delete_product(&state.db, &id, &user.0).await?;
    ok_with_message((), "Product archived")
}
