use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

pub const MAX_GIFT_NAME_LEN: usize = 50;
pub const MAX_GIFT_MESSAGE_LEN: usize = 200;
pub const MAX_GIFT_QUANTITY: u32 = 99;
/// Share of a gift's price credited to the receiving host
pub const RECEIVER_SHARE_PERCENT: i64 = 70;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum GiftCategory {
    #[default]
    Emoji,
    Sticker,
    Animated,
    Luxury,
    Seasonal,
    Effect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GiftRarity {
    #[default]
    Common,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GiftStatus {
    #[default]
    Active,
    Inactive,
}

/// Catalog entry; `name` is the unique slug
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gift {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub category: GiftCategory,
    pub rarity: GiftRarity,
    pub price_cents: i64,
    pub icon_url: String,
    pub animation_url: Option<String>,
    pub status: GiftStatus,
    /// Lower sorts first in the catalog
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub times_sent: u64,
    #[serde(default)]
    pub total_revenue_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Gift {
    const COLLECTION: &'static str = "gifts";
    const NAME: &'static str = "Gift";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Gift {
    pub fn doc_id(name: &str) -> String {
        format!("gift_{}", name)
    }
}

/// A gift sent during a live stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftTransaction {
    pub id: String,
    pub gift_id: String,
    pub gift_name: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub stream_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
    pub receiver_share_cents: i64,
    pub platform_fee_cents: i64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document for GiftTransaction {
    const COLLECTION: &'static str = "gift_transactions";
    const NAME: &'static str = "Gift transaction";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Splits a gift total into the receiver's share and the platform fee
pub fn split_revenue(total_cents: i64) -> (i64, i64) {
    let receiver = total_cents * RECEIVER_SHARE_PERCENT / 100;
    (receiver, total_cents - receiver)
}
