use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    /// `value` is a whole percentage
    Percentage,
    /// `value` is in cents
    Fixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    #[default]
    Active,
    Inactive,
}

/// Discount code; the uppercased code is the document id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
    #[serde(default)]
    pub min_order_cents: i64,
    pub max_discount_cents: Option<i64>,
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub used_count: u32,
    pub per_user_limit: u32,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CouponStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Coupon {
    const COLLECTION: &'static str = "coupons";
    const NAME: &'static str = "Coupon";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Coupon {
    /// Discount in cents for a subtotal, never more than the subtotal
    pub fn discount_for(&self, subtotal_cents: i64) -> i64 {
        let raw = match self.kind {
            CouponKind::Percentage => subtotal_cents * self.value / 100,
            CouponKind::Fixed => self.value,
        };
        let capped = match self.max_discount_cents {
            Some(max) => raw.min(max),
            None => raw,
        };
        capped.clamp(0, subtotal_cents.max(0))
    }
}

/// Per-user redemption counter, id `"{code}_{user_id}"`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponUse {
    pub id: String,
    pub code: String,
    pub user_id: String,
    pub uses: u32,
    pub last_used_at: DateTime<Utc>,
}

impl Document for CouponUse {
    const COLLECTION: &'static str = "coupon_uses";
    const NAME: &'static str = "Coupon use";

    fn id(&self) -> &str {
        &self.id
    }
}

impl CouponUse {
    pub fn doc_id(code: &str, user_id: &str) -> String {
        format!("{}_{}", code, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(kind: CouponKind, value: i64, max: Option<i64>) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: "SAVE".to_string(),
            code: "SAVE".to_string(),
            kind,
            value,
            min_order_cents: 0,
            max_discount_cents: max,
            usage_limit: None,
            used_count: 0,
            per_user_limit: 1,
            starts_at: None,
            expires_at: None,
            status: CouponStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_percentage_discount_with_cap() {
        assert_eq!(coupon(CouponKind::Percentage, 10, None).discount_for(5000), 500);
        assert_eq!(coupon(CouponKind::Percentage, 50, Some(1000)).discount_for(5000), 1000);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        assert_eq!(coupon(CouponKind::Fixed, 2000, None).discount_for(1500), 1500);
        assert_eq!(coupon(CouponKind::Fixed, 2000, None).discount_for(9000), 2000);
    }
}
