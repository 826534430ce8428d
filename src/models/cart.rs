use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::Document;

pub const MAX_ITEM_QUANTITY: u32 = 99;
pub const STANDARD_SHIPPING_CENTS: i64 = 599;
pub const EXPRESS_SHIPPING_CENTS: i64 = 1299;
/// A store group at or above this subtotal ships free
pub const FREE_SHIPPING_THRESHOLD_CENTS: i64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub product_id: String,
    pub store_id: String,
    pub seller_id: String,
    pub name: String,
    pub image: Option<String>,
    /// Price captured when the item was added, refreshed on revalidation
    pub unit_price_cents: i64,
    pub quantity: u32,
}

impl CartItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price_cents * self.quantity as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CartTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub item_count: u32,
}

/// Shopping cart, one per user (id = user id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub totals: CartTotals,
    pub updated_at: DateTime<Utc>,
}

impl Document for Cart {
    const COLLECTION: &'static str = "carts";
    const NAME: &'static str = "Cart";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Cart {
    pub fn empty(user_id: &str) -> Self {
        Self {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
            items: Vec::new(),
            coupon_code: None,
            totals: CartTotals::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn item_mut(&mut self, product_id: &str) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|i| i.product_id == product_id)
    }

    pub fn subtotal(&self) -> i64 {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Items keyed by store, in a stable order
    pub fn store_groups(&self) -> BTreeMap<String, Vec<CartItem>> {
        let mut groups: BTreeMap<String, Vec<CartItem>> = BTreeMap::new();
        for item in &self.items {
            groups
                .entry(item.store_id.clone())
                .or_default()
                .push(item.clone());
        }
        groups
    }

    /// Recomputes totals with the given coupon discount
    pub fn recalculate(&mut self, discount_cents: i64) {
        let subtotal = self.subtotal();
        let shipping = self
            .store_groups()
            .values()
            .map(|items| shipping_for(items.iter().map(CartItem::line_total).sum()))
            .sum();
        let discount = discount_cents.clamp(0, subtotal);

        self.totals = CartTotals {
            subtotal_cents: subtotal,
            discount_cents: discount,
            shipping_cents: shipping,
            total_cents: subtotal - discount + shipping,
            item_count: self.items.iter().map(|i| i.quantity).sum(),
        };
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.coupon_code = None;
        self.recalculate(0);
    }
}

/// Standard shipping for one store group
pub fn shipping_for(group_subtotal_cents: i64) -> i64 {
    if group_subtotal_cents <= 0 || group_subtotal_cents >= FREE_SHIPPING_THRESHOLD_CENTS {
        0
    } else {
        STANDARD_SHIPPING_CENTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, store: &str, price: i64, qty: u32) -> CartItem {
        CartItem {
            product_id: product.to_string(),
            store_id: store.to_string(),
            seller_id: format!("seller-{}", store),
            name: product.to_string(),
            image: None,
            unit_price_cents: price,
            quantity: qty,
        }
    }

    #[test]
    fn test_shipping_per_store_group() {
        let mut cart = Cart::empty("u1");
        cart.items.push(item("p1", "s1", 1000, 2)); // 2000, ships
        cart.items.push(item("p2", "s2", 6000, 1)); // free
        cart.items.push(item("p3", "s1", 500, 1)); // s1 = 2500
        cart.recalculate(0);

        assert_eq!(cart.totals.subtotal_cents, 8500);
        assert_eq!(cart.totals.shipping_cents, STANDARD_SHIPPING_CENTS);
        assert_eq!(cart.totals.total_cents, 8500 + STANDARD_SHIPPING_CENTS);
        assert_eq!(cart.totals.item_count, 4);
    }

    #[test]
    fn test_discount_clamped_to_subtotal() {
        let mut cart = Cart::empty("u1");
        cart.items.push(item("p1", "s1", 300, 1));
        cart.recalculate(1000);
        assert_eq!(cart.totals.discount_cents, 300);
        assert_eq!(cart.totals.total_cents, STANDARD_SHIPPING_CENTS);
    }

    #[test]
    fn test_empty_cart_has_no_shipping() {
        let mut cart = Cart::empty("u1");
        cart.recalculate(0);
        assert_eq!(cart.totals, CartTotals::default());
    }
}
