//! Virtual gift catalog and gifting during live streams.
//!
//! A gift debits the sender's wallet for the full price and credits the host
//! with their share; both ledgers, the stream's gift count, the catalog stats
//! and the host's notification commit together.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{
    db::{with_retry, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        gift::{split_revenue, MAX_GIFT_MESSAGE_LEN, MAX_GIFT_NAME_LEN, MAX_GIFT_QUANTITY},
        new_id, Activity, ActivityKind, Gift, GiftCategory, GiftRarity, GiftStatus, GiftTransaction,
        LiveStatus, LiveStream, NotificationKind, Page, PageParams, TransactionKind, User,
    },
    services::{
        activity, live, notifications,
        wallets::{self, Movement},
    },
};

pub const DEFAULT_POPULAR_LIMIT: usize = 20;
pub const MAX_POPULAR_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateGiftInput {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub category: GiftCategory,
    #[serde(default)]
    pub rarity: GiftRarity,
    pub price_cents: i64,
    pub icon_url: String,
    pub animation_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct GiftFilters {
    pub category: Option<GiftCategory>,
}

#[derive(Debug, Deserialize)]
pub struct SendGiftInput {
    pub gift_id: String,
    pub quantity: Option<u32>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GiftReceipt {
    pub transaction: GiftTransaction,
    pub balance_after_cents: i64,
    /// The stream's gift count after this send
    pub stream_gifts: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Supporter {
    pub user_id: String,
    pub gifts: u64,
    pub total_cents: i64,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("gift name pattern is valid"))
}

fn validate_gift(input: &CreateGiftInput) -> AppResult<String> {
    let name = input.name.trim().to_lowercase();
    if name.is_empty() || name.len() > MAX_GIFT_NAME_LEN || !name_pattern().is_match(&name) {
        return Err(AppError::invalid(format!(
            "Gift name must be 1-{} lowercase letters, digits or underscores",
            MAX_GIFT_NAME_LEN
        )));
    }
    if input.display_name.trim().is_empty() {
        return Err(AppError::invalid("Display name is required"));
    }
    if input.price_cents <= 0 {
        return Err(AppError::invalid("Price must be greater than zero"));
    }
    if input.icon_url.trim().is_empty() {
        return Err(AppError::invalid("An icon URL is required"));
    }
    Ok(name)
}

/// Admin: adds a gift to the catalog
pub async fn create_gift(db: &Db, input: CreateGiftInput) -> AppResult<Gift> {
    let name = validate_gift(&input)?;
    let now = Utc::now();
    let gift = Gift {
        id: Gift::doc_id(&name),
        name,
        display_name: input.display_name.trim().to_string(),
        category: input.category,
        rarity: input.rarity,
        price_cents: input.price_cents,
        icon_url: input.icon_url.trim().to_string(),
        animation_url: input.animation_url,
        status: GiftStatus::Active,
        sort_order: input.sort_order,
        times_sent: 0,
        total_revenue_cents: 0,
        created_at: now,
        updated_at: now,
    };
    match db.insert(&gift).await {
        Ok(()) => {}
        Err(AppError::WriteConflict(_)) => {
            return Err(AppError::Conflict(format!("Gift {} already exists", gift.name)))
        }
        Err(e) => return Err(e),
    }

    tracing::info!(gift_id = %gift.id, price_cents = gift.price_cents, "Gift created");
    Ok(gift)
}

/// Admin: retires or restores a gift
pub async fn set_status(db: &Db, gift_id: &str, status: GiftStatus) -> AppResult<Gift> {
    let gift = with_retry("set_gift_status", || async {
        let mut gift = db.require::<Gift>(gift_id).await?;
        gift.status = status;
        gift.updated_at = Utc::now();
        db.update(&gift).await?;
        Ok(gift.into_inner())
    })
    .await?;
    tracing::info!(gift_id, status = ?status, "Gift status set");
    Ok(gift)
}

/// Active gifts in catalog order
pub async fn catalog(db: &Db, filters: &GiftFilters, params: &PageParams) -> AppResult<Page<Gift>> {
    let mut query = Query::new().eq("status", GiftStatus::Active);
    if let Some(category) = filters.category {
        query = query.eq("category", category);
    }
    let items = db
        .find::<Gift>(
            &query
                .order_by("sort_order", Direction::Asc)
                .order_by("price_cents", Direction::Asc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Page::from_overfetch(items, params))
}

/// Most sent active gifts
pub async fn popular(db: &Db, limit: Option<usize>) -> AppResult<Vec<Gift>> {
    let limit = limit
        .unwrap_or(DEFAULT_POPULAR_LIMIT)
        .clamp(1, MAX_POPULAR_LIMIT);
    db.find(
        &Query::new()
            .eq("status", GiftStatus::Active)
            .order_by("times_sent", Direction::Desc)
            .order_by("total_revenue_cents", Direction::Desc)
            .limit(limit),
    )
    .await
}

/// Sends `quantity` of a gift to the host of a live stream
pub async fn send(db: &Db, sender: &User, stream_id: &str, input: SendGiftInput) -> AppResult<GiftReceipt> {
    let quantity = input.quantity.unwrap_or(1);
    if quantity == 0 || quantity > MAX_GIFT_QUANTITY {
        return Err(AppError::invalid(format!(
            "Quantity must be 1-{}",
            MAX_GIFT_QUANTITY
        )));
    }
    let message = input
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    if message
        .as_deref()
        .is_some_and(|m| m.chars().count() > MAX_GIFT_MESSAGE_LEN)
    {
        return Err(AppError::invalid(format!(
            "Gift message must be at most {} characters",
            MAX_GIFT_MESSAGE_LEN
        )));
    }

    let snapshot = db.require::<LiveStream>(stream_id).await?;
    live::ensure_can_watch(db, &snapshot, Some(sender)).await?;
    if snapshot.host_id == sender.id {
        return Err(AppError::invalid("You cannot send gifts to your own stream"));
    }
    let host_id = snapshot.host_id.clone();

    let receipt = with_retry("send_gift", || async {
        let mut gift = db.require::<Gift>(&input.gift_id).await?;
        if gift.status != GiftStatus::Active {
            return Err(AppError::invalid("This gift is not available"));
        }
        let mut stream = db.require::<LiveStream>(stream_id).await?;
        if stream.status != LiveStatus::Live {
            return Err(AppError::invalid("This stream is not live"));
        }

        let total = gift.price_cents * i64::from(quantity);
        let (receiver_share, platform_fee) = split_revenue(total);
        let transaction_id = new_id();
        let description = format!("{}x {}", quantity, gift.display_name);
        let now = Utc::now();

        let mut batch = db.batch();
        let debit = wallets::stage_movement(
            db,
            &mut batch,
            &sender.id,
            &Movement::new(TransactionKind::GiftSent, total, format!("Sent {}", description))
                .counterparty(&host_id)
                .reference(&transaction_id),
            now,
        )
        .await?;
        if receiver_share > 0 {
            wallets::stage_movement(
                db,
                &mut batch,
                &host_id,
                &Movement::new(
                    TransactionKind::GiftReceived,
                    receiver_share,
                    format!("Received {}", description),
                )
                .counterparty(&sender.id)
                .reference(&transaction_id),
                now,
            )
            .await?;
        }

        gift.times_sent += u64::from(quantity);
        gift.total_revenue_cents += total;
        gift.updated_at = now;
        batch.update(&gift)?;

        stream.stats.gifts += u64::from(quantity);
        stream.updated_at = now;
        batch.update(&stream)?;

        let transaction = GiftTransaction {
            id: transaction_id.clone(),
            gift_id: gift.id.clone(),
            gift_name: gift.name.clone(),
            sender_id: sender.id.clone(),
            receiver_id: host_id.clone(),
            stream_id: stream_id.to_string(),
            quantity,
            unit_price_cents: gift.price_cents,
            total_cents: total,
            receiver_share_cents: receiver_share,
            platform_fee_cents: platform_fee,
            message: message.clone(),
            created_at: now,
        };
        batch.insert(&transaction)?;
        batch.insert(&Activity {
            creator_id: Some(host_id.clone()),
            ..activity::new_activity(&sender.id, ActivityKind::Gift, stream_id)
        })?;
        batch.insert(&notifications::from_actor(
            &host_id,
            NotificationKind::Gift,
            &sender.id,
            stream_id,
            format!("{} sent you {}", sender.username, description),
        ))?;
        batch.commit().await?;

        Ok(GiftReceipt {
            balance_after_cents: debit.balance_after_cents,
            stream_gifts: stream.stats.gifts,
            transaction,
        })
    })
    .await?;

    tracing::info!(
        stream_id,
        sender_id = %sender.id,
        host_id = %host_id,
        gift_id = %receipt.transaction.gift_id,
        quantity,
        total_cents = receipt.transaction.total_cents,
        "Gift sent"
    );
    Ok(receipt)
}

/// Biggest spenders on a stream
pub async fn top_supporters(db: &Db, stream_id: &str, limit: usize) -> AppResult<Vec<Supporter>> {
    let sent = db
        .find::<GiftTransaction>(&Query::new().eq("stream_id", stream_id))
        .await?;
    let mut by_sender: HashMap<String, Supporter> = HashMap::new();
    for transaction in sent {
        let entry = by_sender
            .entry(transaction.sender_id.clone())
            .or_insert_with(|| Supporter {
                user_id: transaction.sender_id.clone(),
                gifts: 0,
                total_cents: 0,
            });
        entry.gifts += u64::from(transaction.quantity);
        entry.total_cents += transaction.total_cents;
    }
    let mut supporters: Vec<Supporter> = by_sender.into_values().collect();
    supporters.sort_by(|a, b| {
        b.total_cents
            .cmp(&a.total_cents)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    supporters.truncate(limit.clamp(1, MAX_POPULAR_LIMIT));
    Ok(supporters)
}
