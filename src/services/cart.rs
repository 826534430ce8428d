use serde::{Deserialize, Serialize};

use crate::{
    db::{with_retry, Db},
    error::{AppError, AppResult},
    models::{
        cart::{shipping_for, EXPRESS_SHIPPING_CENTS, MAX_ITEM_QUANTITY},
        Cart, CartItem, CartTotals, Product, Store,
    },
    services::coupons,
};

#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub product_id: String,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemInput {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ApplyCouponInput {
    pub code: String,
}

/// Cart plus what revalidation changed since the last visit
#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ShippingOption {
    pub method: &'static str,
    pub price_cents: i64,
    pub estimated_days: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StoreGroup {
    pub store_id: String,
    pub store_name: Option<String>,
    pub items: Vec<CartItem>,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub shipping_options: Vec<ShippingOption>,
}

#[derive(Debug, Serialize)]
pub struct CartSummary {
    pub groups: Vec<StoreGroup>,
    pub coupon_code: Option<String>,
    pub totals: CartTotals,
}

fn validate_quantity(quantity: u32) -> AppResult<()> {
    if quantity == 0 || quantity > MAX_ITEM_QUANTITY {
        return Err(AppError::invalid(format!(
            "Quantity must be between 1 and {}",
            MAX_ITEM_QUANTITY
        )));
    }
    Ok(())
}

fn line_from(product: &Product, quantity: u32) -> CartItem {
    CartItem {
        product_id: product.id.clone(),
        store_id: product.store_id.clone(),
        seller_id: product.seller_id.clone(),
        name: product.name.clone(),
        image: product.images.first().cloned(),
        unit_price_cents: product.price_cents,
        quantity,
    }
}

fn ensure_stock(product: &Product, quantity: u32) -> AppResult<()> {
    if !product.is_purchasable() {
        return Err(AppError::invalid(format!("{} is not available", product.name)));
    }
    if quantity > product.stock {
        return Err(AppError::InsufficientStock(format!(
            "Only {} of {} left",
            product.stock, product.name
        )));
    }
    Ok(())
}

/// Brings the cart in line with the catalogue: drops unavailable products,
/// clamps quantities to stock, refreshes prices, re-checks the coupon and
/// recomputes totals. Returns a notice per change.
pub async fn revalidate(db: &Db, cart: &mut Cart) -> AppResult<Vec<String>> {
    let mut notices = Vec::new();
    let mut kept = Vec::with_capacity(cart.items.len());

    for item in cart.items.drain(..) {
        let product = match db.get::<Product>(&item.product_id).await? {
            Some(p) if p.is_purchasable() => p,
            _ => {
                notices.push(format!("{} is no longer available and was removed", item.name));
                continue;
            }
        };
        let quantity = item.quantity.min(product.stock);
        if quantity < item.quantity {
            notices.push(format!("Only {} of {} left; quantity updated", product.stock, product.name));
        }
        if product.price_cents != item.unit_price_cents {
            notices.push(format!("The price of {} changed", product.name));
        }
        kept.push(line_from(&product, quantity));
    }
    cart.items = kept;

    let mut discount = 0;
    if let Some(code) = cart.coupon_code.clone() {
        match coupons::validate(db, &code, &cart.user_id, cart.subtotal()).await {
            Ok(applied) => discount = applied.discount_cents,
            Err(AppError::InvalidInput(reason)) => {
                notices.push(format!("Coupon {} removed: {}", code, reason));
                cart.coupon_code = None;
            }
            Err(e) => return Err(e),
        }
    }
    cart.recalculate(discount);
    Ok(notices)
}

/// Read-modify-write of the user's cart with revalidation before saving
async fn modify<F>(db: &Db, operation: &'static str, user_id: &str, change: F) -> AppResult<CartView>
where
    F: Fn(&mut Cart) -> AppResult<()>,
{
    with_retry(operation, || async {
        let existing = db.get_versioned::<Cart>(user_id).await?;
        let mut cart = existing
            .as_ref()
            .map_or_else(|| Cart::empty(user_id), |v| v.doc.clone());
        change(&mut cart)?;
        let notices = revalidate(db, &mut cart).await?;

        match existing {
            Some(mut stored) => {
                stored.doc = cart.clone();
                db.update(&stored).await?;
            }
            None => db.insert(&cart).await?,
        }
        Ok(CartView { cart, notices })
    })
    .await
}

/// The user's cart, created empty on first access and revalidated
pub async fn get(db: &Db, user_id: &str) -> AppResult<CartView> {
    modify(db, "get_cart", user_id, |_| Ok(())).await
}

pub async fn add_item(db: &Db, user_id: &str, input: AddItemInput) -> AppResult<CartView> {
    validate_quantity(input.quantity)?;
    let product = db.require::<Product>(&input.product_id).await?.into_inner();
    ensure_stock(&product, input.quantity)?;

    let view = modify(db, "add_cart_item", user_id, |cart| {
        let existing = cart.item_mut(&product.id).map_or(0, |i| i.quantity);
        let quantity = existing + input.quantity;
        if quantity > MAX_ITEM_QUANTITY {
            return Err(AppError::invalid(format!(
                "At most {} of one product per order",
                MAX_ITEM_QUANTITY
            )));
        }
        ensure_stock(&product, quantity)?;
        match cart.item_mut(&product.id) {
            Some(item) => item.quantity = quantity,
            None => cart.items.push(line_from(&product, quantity)),
        }
        Ok(())
    })
    .await?;

    tracing::debug!(user_id, product_id = %product.id, quantity = input.quantity, "Cart item added");
    Ok(view)
}

pub async fn update_item(db: &Db, user_id: &str, product_id: &str, quantity: u32) -> AppResult<CartView> {
    validate_quantity(quantity)?;
    let product = db.require::<Product>(product_id).await?.into_inner();
    ensure_stock(&product, quantity)?;

    modify(db, "update_cart_item", user_id, |cart| {
        let item = cart
            .item_mut(product_id)
            .ok_or_else(|| AppError::not_found("Item not in cart"))?;
        item.quantity = quantity;
        Ok(())
    })
    .await
}

pub async fn remove_item(db: &Db, user_id: &str, product_id: &str) -> AppResult<CartView> {
    modify(db, "remove_cart_item", user_id, |cart| {
        let before = cart.items.len();
        cart.items.retain(|i| i.product_id != product_id);
        if cart.items.len() == before {
            return Err(AppError::not_found("Item not in cart"));
        }
        Ok(())
    })
    .await
}

pub async fn clear(db: &Db, user_id: &str) -> AppResult<CartView> {
    modify(db, "clear_cart", user_id, |cart| {
        cart.clear();
        Ok(())
    })
    .await
}

pub async fn apply_coupon(db: &Db, user_id: &str, code: &str) -> AppResult<CartView> {
    let current = get(db, user_id).await?.cart;
    if current.items.is_empty() {
        return Err(AppError::invalid("Your cart is empty"));
    }
    let applied = coupons::validate(db, code, user_id, current.subtotal()).await?;

    let view = modify(db, "apply_coupon", user_id, |cart| {
        cart.coupon_code = Some(applied.code.clone());
        Ok(())
    })
    .await?;
    tracing::info!(user_id, code = %applied.code, discount_cents = view.cart.totals.discount_cents, "Coupon applied");
    Ok(view)
}

pub async fn remove_coupon(db: &Db, user_id: &str) -> AppResult<CartView> {
    modify(db, "remove_coupon", user_id, |cart| {
        cart.coupon_code = None;
        Ok(())
    })
    .await
}

fn shipping_options(group_subtotal_cents: i64) -> Vec<ShippingOption> {
    vec![
        ShippingOption {
            method: "standard",
            price_cents: shipping_for(group_subtotal_cents),
            estimated_days: "5-7",
        },
        ShippingOption {
            method: "express",
            price_cents: EXPRESS_SHIPPING_CENTS,
            estimated_days: "2-3",
        },
    ]
}

/// Items grouped per store with shipping choices, as checkout will split them
pub async fn summary(db: &Db, user_id: &str) -> AppResult<CartSummary> {
    let cart = get(db, user_id).await?.cart;

    let mut groups = Vec::new();
    for (store_id, items) in cart.store_groups() {
        let subtotal: i64 = items.iter().map(CartItem::line_total).sum();
        let store_name = db.get::<Store>(&store_id).await?.map(|s| s.name);
        groups.push(StoreGroup {
            store_name,
            subtotal_cents: subtotal,
            shipping_cents: shipping_for(subtotal),
            shipping_options: shipping_options(subtotal),
            store_id,
            items,
        });
    }

    Ok(CartSummary {
        groups,
        coupon_code: cart.coupon_code,
        totals: cart.totals,
    })
}
