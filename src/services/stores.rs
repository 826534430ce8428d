//! Seller stores and their product catalogue.

use chrono::Utc;
use serde::Deserialize;

use crate::{
    db::{with_retry, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        new_id,
        store::{DEFAULT_LOW_STOCK_THRESHOLD, MAX_PRODUCT_DESCRIPTION_LEN, MAX_PRODUCT_NAME_LEN},
        Currency, Page, PageParams, Product, ProductStatus, Store, StoreStatus, User,
    },
};

const MAX_STORE_NAME_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateStoreInput {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub compare_at_price_cents: Option<i64>,
    pub currency: Option<Currency>,
    #[serde(default)]
    pub stock: u32,
    pub low_stock_threshold: Option<u32>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    /// `draft`, `pending_approval` or `active` (default)
    pub status: Option<ProductStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub compare_at_price_cents: Option<i64>,
    pub stock: Option<u32>,
    pub low_stock_threshold: Option<u32>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub status: Option<ProductStatus>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Popular,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductFilters {
    pub q: Option<String>,
    pub category: Option<String>,
    pub store_id: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    #[serde(default)]
    pub sort: ProductSort,
}

/// One store per seller, so the id is derived from the owner
pub fn store_id_for(owner_id: &str) -> String {
    format!("store_{}", owner_id)
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn normalize_category(category: Option<&str>) -> Option<String> {
    category
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_PRODUCT_NAME_LEN {
        return Err(AppError::invalid(format!(
            "Product name must be 1-{} characters",
            MAX_PRODUCT_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: &str) -> AppResult<()> {
    if description.chars().count() > MAX_PRODUCT_DESCRIPTION_LEN {
        return Err(AppError::invalid(format!(
            "Description must be at most {} characters",
            MAX_PRODUCT_DESCRIPTION_LEN
        )));
    }
    Ok(())
}

fn validate_price(price_cents: i64) -> AppResult<()> {
    if price_cents <= 0 {
        return Err(AppError::invalid("Price must be greater than zero"));
    }
    Ok(())
}

/// Shoppers see active and sold-out products
pub fn is_publicly_visible(product: &Product) -> bool {
    matches!(
        product.status,
        ProductStatus::Active | ProductStatus::OutOfStock
    )
}

// ============================================================================
// Stores
// ============================================================================

pub async fn create_store(db: &Db, seller: &User, input: CreateStoreInput) -> AppResult<Store> {
    let name = input.name.trim();
    if name.is_empty() || name.chars().count() > MAX_STORE_NAME_LEN {
        return Err(AppError::invalid(format!(
            "Store name must be 1-{} characters",
            MAX_STORE_NAME_LEN
        )));
    }

    let now = Utc::now();
    let store = Store {
        id: store_id_for(&seller.id),
        owner_id: seller.id.clone(),
        name: name.to_string(),
        description: input.description.unwrap_or_default(),
        status: StoreStatus::Active,
        rating: 0.0,
        product_count: 0,
        created_at: now,
        updated_at: now,
    };
    db.insert(&store).await.map_err(|e| match e {
        AppError::WriteConflict(_) => AppError::Conflict("You already have a store".to_string()),
        other => other,
    })?;

    tracing::info!(store_id = %store.id, owner_id = %seller.id, "Store created");
    Ok(store)
}

pub async fn get_store(db: &Db, store_id: &str) -> AppResult<Store> {
    Ok(db.require::<Store>(store_id).await?.into_inner())
}

pub async fn my_store(db: &Db, owner_id: &str) -> AppResult<Store> {
    db.get::<Store>(&store_id_for(owner_id))
        .await?
        .ok_or_else(|| AppError::not_found("You do not have a store yet"))
}

pub async fn set_store_status(db: &Db, store_id: &str, status: StoreStatus) -> AppResult<Store> {
    let store = with_retry("set_store_status", || async {
        let mut store = db.require::<Store>(store_id).await?;
        store.status = status;
        store.updated_at = Utc::now();
        db.update(&store).await?;
        Ok(store.into_inner())
    })
    .await?;
    tracing::info!(store_id, status = ?status, "Store status set");
    Ok(store)
}

// ============================================================================
// Products
// ============================================================================

pub async fn create_product(db: &Db, seller: &User, input: CreateProductInput) -> AppResult<Product> {
    // 1. Validate
    let name = validate_name(&input.name)?;
    validate_description(&input.description)?;
    validate_price(input.price_cents)?;
    if input.compare_at_price_cents.is_some_and(|c| c < 0) {
        return Err(AppError::invalid("Compare-at price cannot be negative"));
    }
    let status = input.status.unwrap_or(ProductStatus::Active);
    if !matches!(
        status,
        ProductStatus::Draft | ProductStatus::PendingApproval | ProductStatus::Active
    ) {
        return Err(AppError::invalid(
            "New products must be draft, pending_approval or active",
        ));
    }

    // 2. Build
    let now = Utc::now();
    let store_id = store_id_for(&seller.id);
    let mut product = Product {
        id: new_id(),
        store_id: store_id.clone(),
        seller_id: seller.id.clone(),
        name,
        description: input.description,
        price_cents: input.price_cents,
        compare_at_price_cents: input.compare_at_price_cents,
        currency: input.currency.unwrap_or_default(),
        stock: input.stock,
        low_stock_threshold: input.low_stock_threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD),
        category: normalize_category(input.category.as_deref()),
        tags: normalize_tags(&input.tags),
        images: input.images,
        status,
        sales_count: 0,
        created_at: now,
        updated_at: now,
    };
    product.sync_stock_status();

    // 3. Product and the store's count together
    with_retry("create_product", || async {
        let mut store = db
            .get_versioned::<Store>(&store_id)
            .await?
            .ok_or_else(|| AppError::invalid("Create a store before adding products"))?;
        if store.status != StoreStatus::Active {
            return Err(AppError::forbidden("STORE_SUSPENDED", "Your store is suspended"));
        }
        store.product_count += 1;
        store.updated_at = now;

        let mut batch = db.batch();
        batch.insert(&product)?;
        batch.update(&store)?;
        batch.commit().await
    })
    .await?;

    tracing::info!(product_id = %product.id, store_id = %store_id, "Product created");
    Ok(product)
}

fn ensure_product_owner(product: &Product, user: &User) -> AppResult<()> {
    if product.seller_id != user.id && !user.role.is_admin() {
        return Err(AppError::forbidden(
            "NOT_OWNER",
            "You can only manage your own products",
        ));
    }
    Ok(())
}

pub async fn update_product(db: &Db, product_id: &str, user: &User, patch: ProductPatch) -> AppResult<Product> {
    let name = patch.name.as_deref().map(validate_name).transpose()?;
    if let Some(description) = &patch.description {
        validate_description(description)?;
    }
    if let Some(price) = patch.price_cents {
        validate_price(price)?;
    }

    let product = with_retry("update_product", || async {
        let mut product = db.require::<Product>(product_id).await?;
        ensure_product_owner(&product, user)?;

        if let Some(name) = &name {
            product.name = name.clone();
        }
        if let Some(description) = &patch.description {
            product.description = description.clone();
        }
        if let Some(price) = patch.price_cents {
            product.price_cents = price;
        }
        if let Some(compare_at) = patch.compare_at_price_cents {
            product.compare_at_price_cents = Some(compare_at);
        }
        if let Some(threshold) = patch.low_stock_threshold {
            product.low_stock_threshold = threshold;
        }
        if let Some(category) = &patch.category {
            product.category = normalize_category(Some(category));
        }
        if let Some(tags) = &patch.tags {
            product.tags = normalize_tags(tags);
        }
        if let Some(images) = &patch.images {
            product.images = images.clone();
        }
        if let Some(status) = patch.status {
            if !user.role.is_admin() && !product.status.owner_can_move_to(status) {
                return Err(AppError::InvalidTransition(format!(
                    "Cannot move a product from {:?} to {:?}",
                    product.status, status
                )));
            }
            product.status = status;
        }
        if let Some(stock) = patch.stock {
            product.stock = stock;
        }
        product.sync_stock_status();
        product.updated_at = Utc::now();
        db.update(&product).await?;
        Ok(product.into_inner())
    })
    .await?;

    if product.is_low_stock() && is_publicly_visible(&product) {
        tracing::warn!(product_id, stock = product.stock, "Product is low on stock");
    }
    tracing::info!(product_id, user_id = %user.id, "Product updated");
    Ok(product)
}

/// Archives the product and uncounts it from the store
pub async fn delete_product(db: &Db, product_id: &str, user: &User) -> AppResult<()> {
    with_retry("delete_product", || async {
        let mut product = db.require::<Product>(product_id).await?;
        ensure_product_owner(&product, user)?;
        if product.status == ProductStatus::Archived {
            return Ok(());
        }
        product.status = ProductStatus::Archived;
        product.updated_at = Utc::now();

        let mut batch = db.batch();
        batch.update(&product)?;
        if let Some(mut store) = db.get_versioned::<Store>(&product.store_id).await? {
            store.product_count = store.product_count.saturating_sub(1);
            batch.update(&store)?;
        }
        batch.commit().await
    })
    .await?;

    tracing::info!(product_id, user_id = %user.id, "Product archived");
    Ok(())
}

pub async fn get_product(db: &Db, product_id: &str, viewer: Option<&User>) -> AppResult<Product> {
    let product = db.require::<Product>(product_id).await?.into_inner();
    let privileged = viewer.is_some_and(|v| v.id == product.seller_id || v.role.is_admin());
    if !privileged && !is_publicly_visible(&product) {
        return Err(AppError::not_found("Product not found"));
    }
    Ok(product)
}

fn matches_text(product: &Product, needle: &str) -> bool {
    product.name.to_lowercase().contains(needle)
        || product.description.to_lowercase().contains(needle)
        || product.tags.iter().any(|t| t.contains(needle))
}

/// Public catalogue search
pub async fn list_products(db: &Db, filters: &ProductFilters, params: &PageParams) -> AppResult<Page<Product>> {
    let mut query = Query::new().is_in(
        "status",
        [ProductStatus::Active, ProductStatus::OutOfStock],
    );
    if let Some(category) = normalize_category(filters.category.as_deref()) {
        query = query.eq("category", category);
    }
    if let Some(store_id) = &filters.store_id {
        query = query.eq("store_id", store_id);
    }
    if let Some(min) = filters.min_price {
        query = query.gte("price_cents", min);
    }
    if let Some(max) = filters.max_price {
        query = query.lte("price_cents", max);
    }
    query = match filters.sort {
        ProductSort::Newest => query.order_by("created_at", Direction::Desc),
        ProductSort::PriceAsc => query.order_by("price_cents", Direction::Asc),
        ProductSort::PriceDesc => query.order_by("price_cents", Direction::Desc),
        ProductSort::Popular => query
            .order_by("sales_count", Direction::Desc)
            .order_by("created_at", Direction::Desc),
    };

    let needle = filters
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    let items = match needle {
        None => {
            db.find::<Product>(&query.offset(params.offset()).limit(params.limit() + 1))
                .await?
        }
        Some(needle) => db
            .find::<Product>(&query)
            .await?
            .into_iter()
            .filter(|p| matches_text(p, &needle))
            .skip(params.offset())
            .take(params.limit() + 1)
            .collect(),
    };
    Ok(Page::from_overfetch(items, params))
}

/// Admin review outcome
pub async fn set_product_status(db: &Db, product_id: &str, status: ProductStatus) -> AppResult<Product> {
    let product = with_retry("set_product_status", || async {
        let mut product = db.require::<Product>(product_id).await?;
        product.status = status;
        product.sync_stock_status();
        product.updated_at = Utc::now();
        db.update(&product).await?;
        Ok(product.into_inner())
    })
    .await?;
    tracing::info!(product_id, status = ?product.status, "Product status set");
    Ok(product)
}

/// Seller's listed products at or below their low-stock threshold
pub async fn low_stock(db: &Db, seller_id: &str) -> AppResult<Vec<Product>> {
    let mut products: Vec<Product> = db
        .find::<Product>(
            &Query::new()
                .eq("seller_id", seller_id)
                .is_in("status", [ProductStatus::Active, ProductStatus::OutOfStock]),
        )
        .await?
        .into_iter()
        .filter(Product::is_low_stock)
        .collect();
    products.sort_by_key(|p| p.stock);
    Ok(products)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::users::tests::user;

    pub(crate) async fn seed_seller(db: &Db, id: &str) -> User {
        let mut seller = user(id);
        seller.role = Role::Seller;
        db.insert(&seller).await.unwrap();
        create_store(
            db,
            &seller,
            CreateStoreInput {
                name: format!("{} shop", id),
                description: None,
            },
        )
        .await
        .unwrap();
        seller
    }

    pub(crate) async fn seed_product(db: &Db, seller: &User, name: &str, price: i64, stock: u32) -> Product {
        create_product(
            db,
            seller,
            CreateProductInput {
                name: name.to_string(),
                price_cents: price,
                stock,
                category: Some("Gadgets".to_string()),
                tags: vec!["Tech".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_one_store_per_seller() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        let again = create_store(
            &db,
            &seller,
            CreateStoreInput {
                name: "Second".to_string(),
                description: None,
            },
        )
        .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert_eq!(my_store(&db, "sam").await.unwrap().name, "sam shop");
    }

    #[tokio::test]
    async fn test_create_product_validates_and_counts() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;

        let free = CreateProductInput {
            name: "Free".to_string(),
            price_cents: 0,
            ..Default::default()
        };
        assert!(create_product(&db, &seller, free).await.is_err());

        let product = seed_product(&db, &seller, "Widget", 1999, 5).await;
        assert_eq!(product.category.as_deref(), Some("gadgets"));
        assert_eq!(product.tags, vec!["tech"]);
        assert_eq!(my_store(&db, "sam").await.unwrap().product_count, 1);

        let sold_out = seed_product(&db, &seller, "Rare", 5000, 0).await;
        assert_eq!(sold_out.status, ProductStatus::OutOfStock);
    }

    #[tokio::test]
    async fn test_stock_changes_sync_status() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        let product = seed_product(&db, &seller, "Widget", 1999, 5).await;

        let empty = ProductPatch {
            stock: Some(0),
            ..Default::default()
        };
        let updated = update_product(&db, &product.id, &seller, empty).await.unwrap();
        assert_eq!(updated.status, ProductStatus::OutOfStock);

        let restock = ProductPatch {
            stock: Some(20),
            ..Default::default()
        };
        let updated = update_product(&db, &product.id, &seller, restock).await.unwrap();
        assert_eq!(updated.status, ProductStatus::Active);
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_manages_product() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        let rival = seed_seller(&db, "rita").await;
        let product = seed_product(&db, &seller, "Widget", 1999, 5).await;

        assert!(delete_product(&db, &product.id, &rival).await.is_err());
        delete_product(&db, &product.id, &seller).await.unwrap();
        assert!(get_product(&db, &product.id, None).await.is_err());
        assert!(get_product(&db, &product.id, Some(&seller)).await.is_ok());
        assert_eq!(my_store(&db, "sam").await.unwrap().product_count, 0);
    }

    #[tokio::test]
    async fn test_list_products_filters_and_sorts() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        seed_product(&db, &seller, "Cheap lamp", 500, 5).await;
        seed_product(&db, &seller, "Fancy lamp", 9000, 5).await;
        seed_product(&db, &seller, "Chair", 3000, 5).await;
        let mut draft = CreateProductInput {
            name: "Hidden lamp".to_string(),
            price_cents: 100,
            status: Some(ProductStatus::Draft),
            ..Default::default()
        };
        draft.stock = 1;
        create_product(&db, &seller, draft).await.unwrap();

        let lamps = ProductFilters {
            q: Some("LAMP".to_string()),
            sort: ProductSort::PriceDesc,
            ..Default::default()
        };
        let page = list_products(&db, &lamps, &PageParams::default()).await.unwrap();
        let names: Vec<_> = page.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Fancy lamp", "Cheap lamp"]);

        let mid = ProductFilters {
            min_price: Some(1000),
            max_price: Some(5000),
            ..Default::default()
        };
        let page = list_products(&db, &mid, &PageParams::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "Chair");
    }

    #[tokio::test]
    async fn test_low_stock_and_review_statuses() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        seed_product(&db, &seller, "Plenty", 1000, 50).await;
        let scarce = seed_product(&db, &seller, "Scarce", 1000, 2).await;

        let low = low_stock(&db, "sam").await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, scarce.id);

        let reject = ProductPatch {
            status: Some(ProductStatus::Rejected),
            ..Default::default()
        };
        assert!(update_product(&db, &scarce.id, &seller, reject).await.is_err());
        let rejected = set_product_status(&db, &scarce.id, ProductStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(rejected.status, ProductStatus::Rejected);
    }

    fn to_status(status: ProductStatus) -> ProductPatch {
        ProductPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_owner_cannot_self_approve() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        let product = seed_product(&db, &seller, "Widget", 1999, 5).await;

        set_product_status(&db, &product.id, ProductStatus::Rejected).await.unwrap();
        assert!(matches!(
            update_product(&db, &product.id, &seller, to_status(ProductStatus::Active)).await,
            Err(AppError::InvalidTransition(_))
        ));
        assert!(matches!(
            update_product(&db, &product.id, &seller, to_status(ProductStatus::Draft)).await,
            Err(AppError::InvalidTransition(_))
        ));

        // resubmission goes draft -> pending_approval, never straight to active
        set_product_status(&db, &product.id, ProductStatus::Draft).await.unwrap();
        let pending = update_product(&db, &product.id, &seller, to_status(ProductStatus::PendingApproval))
            .await
            .unwrap();
        assert_eq!(pending.status, ProductStatus::PendingApproval);
        assert!(update_product(&db, &product.id, &seller, to_status(ProductStatus::Active))
            .await
            .is_err());
        assert_eq!(
            db.require::<Product>(&product.id).await.unwrap().status,
            ProductStatus::PendingApproval
        );
    }

    #[tokio::test]
    async fn test_owner_status_moves() {
        let db = Db::memory();
        let seller = seed_seller(&db, "sam").await;
        let product = seed_product(&db, &seller, "Widget", 1999, 5).await;

        let archived = update_product(&db, &product.id, &seller, to_status(ProductStatus::Archived))
            .await
            .unwrap();
        assert_eq!(archived.status, ProductStatus::Archived);
        assert!(update_product(&db, &product.id, &seller, to_status(ProductStatus::Active))
            .await
            .is_err());
        let draft = update_product(&db, &product.id, &seller, to_status(ProductStatus::Draft))
            .await
            .unwrap();
        assert_eq!(draft.status, ProductStatus::Draft);
    }
}
