use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

pub const MAX_PRODUCT_NAME_LEN: usize = 200;
pub const MAX_PRODUCT_DESCRIPTION_LEN: usize = 5000;
pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: StoreStatus,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub product_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Store {
    const COLLECTION: &'static str = "stores";
    const NAME: &'static str = "Store";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    PendingApproval,
    #[default]
    Active,
    OutOfStock,
    Archived,
    Rejected,
}

impl ProductStatus {
    /// Moves a seller may make on their own listing; approval and rejection
    /// belong to review
    pub fn owner_can_move_to(self, next: ProductStatus) -> bool {
        use ProductStatus::*;
        let listed = |s: ProductStatus| matches!(s, Active | OutOfStock);
        (listed(self) && listed(next))
            || self == next
            || matches!(
                (self, next),
                (Active | OutOfStock, Draft | Archived) | (Archived, Draft) | (Draft, PendingApproval)
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub seller_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub compare_at_price_cents: Option<i64>,
    pub currency: Currency,
    pub stock: u32,
    pub low_stock_threshold: u32,
    pub category: Option<String>,
    /// Lowercased
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub status: ProductStatus,
    #[serde(default)]
    pub sales_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Product {
    const COLLECTION: &'static str = "products";
    const NAME: &'static str = "Product";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Product {
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Active && self.stock > 0
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.low_stock_threshold
    }

    /// Keeps `active`/`out_of_stock` in line with the stock level
    pub fn sync_stock_status(&mut self) {
        match self.status {
            ProductStatus::Active if self.stock == 0 => self.status = ProductStatus::OutOfStock,
            ProductStatus::OutOfStock if self.stock > 0 => self.status = ProductStatus::Active,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_and_status_wire_names() {
        assert_eq!(serde_json::to_string(&Currency::Usd).unwrap(), "\"USD\"");
        assert_eq!(
            serde_json::to_string(&ProductStatus::PendingApproval).unwrap(),
            "\"pending_approval\""
        );
    }

    #[test]
    fn test_owner_status_moves() {
        use ProductStatus::*;
        assert!(Active.owner_can_move_to(Draft));
        assert!(OutOfStock.owner_can_move_to(Archived));
        assert!(Archived.owner_can_move_to(Draft));
        assert!(Draft.owner_can_move_to(PendingApproval));
        assert!(!Draft.owner_can_move_to(Active));
        assert!(!PendingApproval.owner_can_move_to(Active));
        assert!(!Rejected.owner_can_move_to(Active));
        assert!(!Rejected.owner_can_move_to(Draft));
        assert!(!Archived.owner_can_move_to(Active));
    }
}
