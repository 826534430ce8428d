//! In-app notification inbox and admin broadcasts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    db::{with_retry, Db, Direction, Query, Versioned},
    error::{AppError, AppResult},
    models::{
        new_id,
        notification::{MAX_BODY_LEN, MAX_TITLE_LEN},
        Notification, NotificationCampaign, NotificationKind, NotificationPriority, Page,
        PageParams, Recipients, User, UserStatus,
    },
};

/// Upper bound on writes per commit when fanning out a broadcast
const BROADCAST_CHUNK: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct InboxFilters {
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct Inbox {
    #[serde(flatten)]
    pub page: Page<Notification>,
    pub unread: usize,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationInput {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub action_url: Option<String>,
    pub recipients: Recipients,
}

#[derive(Debug, Default, Serialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
    pub by_kind: BTreeMap<NotificationKind, usize>,
    pub campaigns: usize,
    pub sent_last_24h: usize,
}

/// Builds an unread notification; callers stage it on their own batch
pub fn new_notification(
    user_id: &str,
    kind: NotificationKind,
    title: impl Into<String>,
    body: impl Into<String>,
) -> Notification {
    Notification {
        id: new_id(),
        user_id: user_id.to_string(),
        kind,
        title: title.into(),
        body: body.into(),
        actor_id: None,
        reference: None,
        action_url: None,
        priority: NotificationPriority::Normal,
        read: false,
        read_at: None,
        campaign_id: None,
        created_at: Utc::now(),
    }
}

/// Notification caused by another user, pointing at `reference`
pub fn from_actor(
    user_id: &str,
    kind: NotificationKind,
    actor_id: &str,
    reference: &str,
    title: impl Into<String>,
) -> Notification {
    Notification {
        actor_id: Some(actor_id.to_string()),
        reference: Some(reference.to_string()),
        ..new_notification(user_id, kind, title, "")
    }
}

/// Newest first, with the unread total alongside
pub async fn inbox(
    db: &Db,
    user_id: &str,
    filters: &InboxFilters,
    params: &PageParams,
) -> AppResult<Inbox> {
    let mut query = Query::new().eq("user_id", user_id);
    if let Some(kind) = filters.kind {
        query = query.eq("kind", kind);
    }
    if filters.unread_only {
        query = query.eq("read", false);
    }
    let items = db
        .find::<Notification>(
            &query
                .order_by("created_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Inbox {
        page: Page::from_overfetch(items, params),
        unread: unread_count(db, user_id).await?,
    })
}

pub async fn unread_count(db: &Db, user_id: &str) -> AppResult<usize> {
    db.count::<Notification>(&Query::new().eq("user_id", user_id).eq("read", false))
        .await
}

/// Someone else's notification reads as missing
async fn owned(db: &Db, notification_id: &str, user_id: &str) -> AppResult<Versioned<Notification>> {
    let notification = db.require::<Notification>(notification_id).await?;
    if notification.user_id != user_id {
        return Err(AppError::not_found("Notification not found"));
    }
    Ok(notification)
}

pub async fn mark_read(db: &Db, notification_id: &str, user_id: &str) -> AppResult<Notification> {
    with_retry("mark_notification_read", || async {
        let mut notification = owned(db, notification_id, user_id).await?;
        if !notification.read {
            notification.read = true;
            notification.read_at = Some(Utc::now());
            db.update(&notification).await?;
        }
        Ok(notification.into_inner())
    })
    .await
}

/// Marks every unread notification read; returns how many changed
pub async fn mark_all_read(db: &Db, user_id: &str) -> AppResult<usize> {
    let marked = with_retry("mark_all_notifications_read", || async {
        let unread = db
            .find_versioned::<Notification>(&Query::new().eq("user_id", user_id).eq("read", false))
            .await?;
        let count = unread.len();
        let now = Utc::now();
        let mut batch = db.batch();
        for mut notification in unread {
            notification.read = true;
            notification.read_at = Some(now);
            batch.update(&notification)?;
        }
        batch.commit().await?;
        Ok(count)
    })
    .await?;

    tracing::debug!(user_id, marked, "Notifications marked read");
    Ok(marked)
}

pub async fn delete(db: &Db, notification_id: &str, user_id: &str) -> AppResult<()> {
    let notification = owned(db, notification_id, user_id).await?;
    let mut batch = db.batch();
    batch.delete_versioned(&notification);
    batch.commit().await
}

fn validate_send(input: &SendNotificationInput) -> AppResult<()> {
    let title = input.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::invalid(format!(
            "Title must be 1-{} characters",
            MAX_TITLE_LEN
        )));
    }
    if input.body.chars().count() > MAX_BODY_LEN {
        return Err(AppError::invalid(format!(
            "Body must be at most {} characters",
            MAX_BODY_LEN
        )));
    }
    if let Recipients::Users { ids } = &input.recipients {
        if ids.is_empty() {
            return Err(AppError::invalid("At least one recipient is required"));
        }
    }
    Ok(())
}

/// Active accounts the broadcast reaches, deduplicated
async fn resolve_recipients(db: &Db, recipients: &Recipients) -> AppResult<Vec<String>> {
    let active = Query::new().eq("status", UserStatus::Active);
    let ids: BTreeSet<String> = match recipients {
        Recipients::All => db.find::<User>(&active).await?.into_iter().map(|u| u.id).collect(),
        Recipients::Role { role } => db
            .find::<User>(&active.eq("role", role))
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect(),
        Recipients::Users { ids } => {
            let mut found = BTreeSet::new();
            for id in ids {
                let user = db.get::<User>(id).await?.ok_or(AppError::UserNotFound)?;
                if user.is_active() {
                    found.insert(user.id);
                }
            }
            found
        }
    };
    Ok(ids.into_iter().collect())
}

/// Admin broadcast; every recipient gets their own inbox entry
pub async fn send(db: &Db, admin: &User, input: SendNotificationInput) -> AppResult<NotificationCampaign> {
    validate_send(&input)?;
    let recipients = resolve_recipients(db, &input.recipients).await?;
    if recipients.is_empty() {
        return Err(AppError::invalid("No active users match these recipients"));
    }

    let now = Utc::now();
    let campaign = NotificationCampaign {
        id: new_id(),
        sent_by: admin.id.clone(),
        kind: input.kind.unwrap_or(NotificationKind::Announcement),
        title: input.title.trim().to_string(),
        body: input.body.trim().to_string(),
        priority: input.priority,
        recipients: input.recipients,
        delivered: recipients.len(),
        created_at: now,
    };

    for chunk in recipients.chunks(BROADCAST_CHUNK) {
        let mut batch = db.batch();
        for user_id in chunk {
            batch.insert(&Notification {
                reference: Some(campaign.id.clone()),
                action_url: input.action_url.clone(),
                priority: campaign.priority,
                campaign_id: Some(campaign.id.clone()),
                created_at: now,
                ..new_notification(user_id, campaign.kind, &campaign.title, &campaign.body)
            })?;
        }
        batch.commit().await?;
    }
    db.insert(&campaign).await?;

    tracing::info!(
        campaign_id = %campaign.id,
        admin_id = %admin.id,
        delivered = campaign.delivered,
        "Notification broadcast sent"
    );
    Ok(campaign)
}

/// Admin sends, newest first
pub async fn history(db: &Db, params: &PageParams) -> AppResult<Page<NotificationCampaign>> {
    let items = db
        .find::<NotificationCampaign>(
            &Query::new()
                .order_by("created_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Page::from_overfetch(items, params))
}

pub async fn stats(db: &Db, now: DateTime<Utc>) -> AppResult<NotificationStats> {
    let notifications = db.find::<Notification>(&Query::new()).await?;
    let since = now - Duration::hours(24);
    let mut stats = NotificationStats {
        total: notifications.len(),
        campaigns: db.count::<NotificationCampaign>(&Query::new()).await?,
        ..Default::default()
    };
    for notification in &notifications {
        *stats.by_kind.entry(notification.kind).or_insert(0) += 1;
        if !notification.read {
            stats.unread += 1;
        }
        if notification.created_at >= since {
            stats.sent_last_24h += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::users::tests::{seed_user, user};

    async fn admin(db: &Db) -> User {
        let mut admin = user("admin");
        admin.role = Role::Admin;
        db.insert(&admin).await.unwrap();
        admin
    }

    fn broadcast(recipients: Recipients) -> SendNotificationInput {
        SendNotificationInput {
            title: " Maintenance tonight ".to_string(),
            body: "We will be down for ten minutes".to_string(),
            kind: None,
            priority: NotificationPriority::High,
            action_url: None,
            recipients,
        }
    }

    async fn seed(db: &Db, user_id: &str, kind: NotificationKind) -> Notification {
        let notification = new_notification(user_id, kind, "hello", "");
        db.insert(&notification).await.unwrap();
        notification
    }

    #[tokio::test]
    async fn test_inbox_filters_and_unread_count() {
        let db = Db::memory();
        seed(&db, "ann", NotificationKind::Follow).await;
        let like = seed(&db, "ann", NotificationKind::Like).await;
        seed(&db, "ben", NotificationKind::Like).await;

        let inbox_all = inbox(&db, "ann", &InboxFilters::default(), &PageParams::default())
            .await
            .unwrap();
        assert_eq!(inbox_all.page.items.len(), 2);
        assert_eq!(inbox_all.unread, 2);

        mark_read(&db, &like.id, "ann").await.unwrap();
        let unread = InboxFilters {
            unread_only: true,
            ..Default::default()
        };
        let page = inbox(&db, "ann", &unread, &PageParams::default()).await.unwrap();
        assert_eq!(page.page.items.len(), 1);
        assert_eq!(page.page.items[0].kind, NotificationKind::Follow);
        assert_eq!(page.unread, 1);

        let likes = InboxFilters {
            kind: Some(NotificationKind::Like),
            ..Default::default()
        };
        let page = inbox(&db, "ann", &likes, &PageParams::default()).await.unwrap();
        assert_eq!(page.page.items.len(), 1);
        assert!(page.page.items[0].read);
    }

    #[tokio::test]
    async fn test_only_the_owner_can_touch_a_notification() {
        let db = Db::memory();
        let note = seed(&db, "ann", NotificationKind::System).await;

        assert!(matches!(
            mark_read(&db, &note.id, "ben").await,
            Err(AppError::NotFound(_))
        ));
        assert!(delete(&db, &note.id, "ben").await.is_err());

        let read = mark_read(&db, &note.id, "ann").await.unwrap();
        assert!(read.read_at.is_some());
        delete(&db, &note.id, "ann").await.unwrap();
        assert_eq!(unread_count(&db, "ann").await.unwrap(), 0);
        assert!(db.get::<Notification>(&note.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let db = Db::memory();
        for _ in 0..3 {
            seed(&db, "ann", NotificationKind::Comment).await;
        }
        seed(&db, "ben", NotificationKind::Comment).await;

        assert_eq!(mark_all_read(&db, "ann").await.unwrap(), 3);
        assert_eq!(unread_count(&db, "ann").await.unwrap(), 0);
        assert_eq!(unread_count(&db, "ben").await.unwrap(), 1);
        assert_eq!(mark_all_read(&db, "ann").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_active_audience() {
        let db = Db::memory();
        let admin = admin(&db).await;
        seed_user(&db, "ann").await;
        let mut ben = seed_user(&db, "ben").await;
        ben.role = Role::Seller;
        db.save(&ben).await.unwrap();
        let mut banned = seed_user(&db, "troll").await;
        banned.status = UserStatus::Banned;
        db.save(&banned).await.unwrap();

        let campaign = send(&db, &admin, broadcast(Recipients::All)).await.unwrap();
        assert_eq!(campaign.delivered, 3);
        assert_eq!(campaign.title, "Maintenance tonight");
        assert_eq!(campaign.kind, NotificationKind::Announcement);
        assert_eq!(unread_count(&db, "troll").await.unwrap(), 0);

        let inbox_ann = inbox(&db, "ann", &InboxFilters::default(), &PageParams::default())
            .await
            .unwrap();
        let entry = &inbox_ann.page.items[0];
        assert_eq!(entry.campaign_id.as_deref(), Some(campaign.id.as_str()));
        assert_eq!(entry.priority, NotificationPriority::High);

        let sellers = send(&db, &admin, broadcast(Recipients::Role { role: Role::Seller }))
            .await
            .unwrap();
        assert_eq!(sellers.delivered, 1);

        let ghost = Recipients::Users {
            ids: vec!["ann".to_string(), "ghost".to_string()],
        };
        assert!(matches!(
            send(&db, &admin, broadcast(ghost)).await,
            Err(AppError::UserNotFound)
        ));
        let only_banned = Recipients::Users {
            ids: vec!["troll".to_string()],
        };
        assert!(send(&db, &admin, broadcast(only_banned)).await.is_err());

        let mut blank = broadcast(Recipients::All);
        blank.title = "   ".to_string();
        assert!(send(&db, &admin, blank).await.is_err());
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let db = Db::memory();
        let admin = admin(&db).await;
        seed_user(&db, "ann").await;
        send(&db, &admin, broadcast(Recipients::All)).await.unwrap();
        let second = send(
            &db,
            &admin,
            broadcast(Recipients::Users {
                ids: vec!["ann".to_string()],
            }),
        )
        .await
        .unwrap();
        seed(&db, "ann", NotificationKind::Follow).await;

        let page = history(&db, &PageParams::default()).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, second.id);

        mark_all_read(&db, "admin").await.unwrap();
        let stats = stats(&db, Utc::now()).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.unread, 3);
        assert_eq!(stats.campaigns, 2);
        assert_eq!(stats.by_kind[&NotificationKind::Announcement], 3);
        assert_eq!(stats.by_kind[&NotificationKind::Follow], 1);
        assert_eq!(stats.sent_last_24h, 4);

        let later = Utc::now() + Duration::days(2);
        assert_eq!(super::stats(&db, later).await.unwrap().sent_last_24h, 0);
    }
}
