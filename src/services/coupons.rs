use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::{with_retry, Batch, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{Coupon, CouponKind, CouponStatus, CouponUse, Page, PageParams},
};

#[derive(Debug, Deserialize)]
pub struct CreateCouponInput {
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
    #[serde(default)]
    pub min_order_cents: i64,
    pub max_discount_cents: Option<i64>,
    pub usage_limit: Option<u32>,
    pub per_user_limit: Option<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub kind: CouponKind,
    pub discount_cents: i64,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Discount the coupon grants right now, or why it does not apply
pub fn evaluate(coupon: &Coupon, user_uses: u32, subtotal_cents: i64, now: DateTime<Utc>) -> AppResult<i64> {
    if coupon.status != CouponStatus::Active {
        return Err(AppError::invalid("Coupon is not active"));
    }
    if coupon.starts_at.is_some_and(|s| now < s) {
        return Err(AppError::invalid("Coupon is not valid yet"));
    }
    if coupon.expires_at.is_some_and(|e| now >= e) {
        return Err(AppError::invalid("Coupon has expired"));
    }
    if coupon.usage_limit.is_some_and(|limit| coupon.used_count >= limit) {
        return Err(AppError::invalid("Coupon usage limit reached"));
    }
    if user_uses >= coupon.per_user_limit {
        return Err(AppError::invalid("You have already used this coupon"));
    }
    if subtotal_cents < coupon.min_order_cents {
        return Err(AppError::invalid(format!(
            "Minimum order of {} cents not met",
            coupon.min_order_cents
        )));
    }
    Ok(coupon.discount_for(subtotal_cents))
}

async fn user_uses(db: &Db, code: &str, user_id: &str) -> AppResult<u32> {
    Ok(db
        .get::<CouponUse>(&CouponUse::doc_id(code, user_id))
        .await?
        .map_or(0, |u| u.uses))
}

pub async fn create(db: &Db, input: CreateCouponInput) -> AppResult<Coupon> {
    let code = normalize_code(&input.code);
    if code.len() < 3 || code.len() > 32 || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AppError::invalid(
            "Coupon code must be 3-32 letters, digits, '-' or '_'",
        ));
    }
    match input.kind {
        CouponKind::Percentage if !(1..=100).contains(&input.value) => {
            return Err(AppError::invalid("Percentage must be between 1 and 100"));
        }
        CouponKind::Fixed if input.value <= 0 => {
            return Err(AppError::invalid("Fixed discount must be positive"));
        }
        _ => {}
    }
    if let (Some(start), Some(end)) = (input.starts_at, input.expires_at) {
        if end <= start {
            return Err(AppError::invalid("Expiry must be after the start date"));
        }
    }

    let now = Utc::now();
    let coupon = Coupon {
        id: code.clone(),
        code,
        kind: input.kind,
        value: input.value,
        min_order_cents: input.min_order_cents.max(0),
        max_discount_cents: input.max_discount_cents,
        usage_limit: input.usage_limit,
        used_count: 0,
        per_user_limit: input.per_user_limit.unwrap_or(1).max(1),
        starts_at: input.starts_at,
        expires_at: input.expires_at,
        status: CouponStatus::Active,
        created_at: now,
        updated_at: now,
    };
    db.insert(&coupon).await.map_err(|e| match e {
        AppError::WriteConflict(_) => AppError::Conflict("Coupon code already exists".to_string()),
        other => other,
    })?;

    tracing::info!(code = %coupon.code, kind = ?coupon.kind, "Coupon created");
    Ok(coupon)
}

pub async fn list(db: &Db, params: &PageParams) -> AppResult<Page<Coupon>> {
    let items = db
        .find::<Coupon>(
            &Query::new()
                .order_by("created_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Page::from_overfetch(items, params))
}

pub async fn deactivate(db: &Db, code: &str) -> AppResult<Coupon> {
    let code = normalize_code(code);
    let coupon = with_retry("deactivate_coupon", || async {
        let mut coupon = db.require::<Coupon>(&code).await?;
        coupon.status = CouponStatus::Inactive;
        coupon.updated_at = Utc::now();
        db.update(&coupon).await?;
        Ok(coupon.into_inner())
    })
    .await?;
    tracing::info!(code = %coupon.code, "Coupon deactivated");
    Ok(coupon)
}

/// Checks a code against a subtotal for this user without consuming it
pub async fn validate(db: &Db, code: &str, user_id: &str, subtotal_cents: i64) -> AppResult<AppliedCoupon> {
    let code = normalize_code(code);
    let coupon = db
        .get::<Coupon>(&code)
        .await?
        .ok_or_else(|| AppError::invalid("Invalid coupon code"))?;
    let uses = user_uses(db, &code, user_id).await?;
    let discount_cents = evaluate(&coupon, uses, subtotal_cents, Utc::now())?;
    Ok(AppliedCoupon {
        code,
        kind: coupon.kind,
        discount_cents,
    })
}

/// Re-checks the coupon inside a transaction and stages its usage counters.
/// Returns the discount for `subtotal_cents`.
pub async fn stage_use(
    db: &Db,
    batch: &mut Batch,
    code: &str,
    user_id: &str,
    subtotal_cents: i64,
    now: DateTime<Utc>,
) -> AppResult<i64> {
    let mut coupon = db
        .get_versioned::<Coupon>(code)
        .await?
        .ok_or_else(|| AppError::invalid("Invalid coupon code"))?;
    let usage = db
        .get_versioned::<CouponUse>(&CouponUse::doc_id(code, user_id))
        .await?;
    let discount = evaluate(&coupon, usage.as_ref().map_or(0, |u| u.uses), subtotal_cents, now)?;

    coupon.used_count += 1;
    coupon.updated_at = now;
    batch.update(&coupon)?;
    match usage {
        Some(mut usage) => {
            usage.uses += 1;
            usage.last_used_at = now;
            batch.update(&usage)?;
        }
        None => batch.insert(&CouponUse {
            id: CouponUse::doc_id(code, user_id),
            code: code.to_string(),
            user_id: user_id.to_string(),
            uses: 1,
            last_used_at: now,
        })?,
    }
    Ok(discount)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn percent_off(code: &str, value: i64) -> CreateCouponInput {
        CreateCouponInput {
            code: code.to_string(),
            kind: CouponKind::Percentage,
            value,
            min_order_cents: 0,
            max_discount_cents: None,
            usage_limit: None,
            per_user_limit: None,
            starts_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_rejects_duplicates() {
        let db = Db::memory();
        let coupon = create(&db, percent_off(" save10 ", 10)).await.unwrap();
        assert_eq!(coupon.code, "SAVE10");
        assert_eq!(coupon.per_user_limit, 1);
        assert!(matches!(
            create(&db, percent_off("SAVE10", 5)).await,
            Err(AppError::Conflict(_))
        ));
        assert!(create(&db, percent_off("BIG", 150)).await.is_err());
    }

    #[tokio::test]
    async fn test_validate_reports_reasons() {
        let db = Db::memory();
        let mut input = percent_off("MIN50", 10);
        input.min_order_cents = 5000;
        create(&db, input).await.unwrap();

        let err = validate(&db, "min50", "u1", 1000).await.unwrap_err();
        assert!(err.to_string().contains("Minimum order"));
        assert_eq!(validate(&db, "min50", "u1", 6000).await.unwrap().discount_cents, 600);

        let mut expired = percent_off("OLD", 10);
        expired.starts_at = Some(Utc::now() - Duration::days(10));
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        create(&db, expired).await.unwrap();
        let err = validate(&db, "OLD", "u1", 6000).await.unwrap_err();
        assert!(err.to_string().contains("expired"));

        assert!(validate(&db, "NOPE", "u1", 6000).await.is_err());

        deactivate(&db, "min50").await.unwrap();
        assert!(validate(&db, "MIN50", "u1", 6000).await.is_err());
    }

    #[tokio::test]
    async fn test_stage_use_enforces_per_user_limit() {
        let db = Db::memory();
        create(&db, percent_off("ONCE", 10)).await.unwrap();
        let now = Utc::now();

        let mut batch = db.batch();
        assert_eq!(stage_use(&db, &mut batch, "ONCE", "u1", 1000, now).await.unwrap(), 100);
        batch.commit().await.unwrap();

        let mut batch = db.batch();
        let err = stage_use(&db, &mut batch, "ONCE", "u1", 1000, now).await.unwrap_err();
        assert!(err.to_string().contains("already used"));

        let coupon = db.require::<Coupon>("ONCE").await.unwrap();
        assert_eq!(coupon.used_count, 1);
        assert!(validate(&db, "ONCE", "u2", 1000).await.is_ok());
    }
}
