use chrono::{Duration, Utc};
use serde::Serialize;

use crate::{
    db::{Db, Query},
    error::AppResult,
    models::{Content, ContentStatus, LiveStatus, LiveStream, Role, User, UserStatus},
    services::{
        moderation::{self, QueueStats},
        orders::{self, OrderStats},
        wallets::{self, WalletStats},
    },
};

const NEW_USER_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
pub struct UserCounts {
    pub total: usize,
    pub active: usize,
    pub banned: usize,
    pub suspended: usize,
    pub sellers: usize,
    pub new_this_week: usize,
}

#[derive(Debug, Serialize)]
pub struct ContentCounts {
    pub total: usize,
    pub active: usize,
    pub removed: usize,
    pub reported: usize,
}

#[derive(Debug, Serialize)]
pub struct LiveCounts {
    pub live_now: usize,
    pub scheduled: usize,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub users: UserCounts,
    pub content: ContentCounts,
    pub orders: OrderStats,
    pub wallets: WalletStats,
    pub moderation: QueueStats,
    pub live: LiveCounts,
}

async fn user_counts(db: &Db) -> AppResult<UserCounts> {
    let users = db.find::<User>(&Query::new()).await?;
    let since = Utc::now() - Duration::days(NEW_USER_WINDOW_DAYS);
    let with_status = |status: UserStatus| users.iter().filter(|u| u.status == status).count();

    Ok(UserCounts {
        total: users.len(),
        active: with_status(UserStatus::Active),
        banned: with_status(UserStatus::Banned),
        suspended: with_status(UserStatus::Suspended),
        sellers: users.iter().filter(|u| u.role == Role::Seller).count(),
        new_this_week: users.iter().filter(|u| u.created_at >= since).count(),
    })
}

async fn content_counts(db: &Db) -> AppResult<ContentCounts> {
    let live = Query::new().eq("is_deleted", false);
    let with_status = |status: ContentStatus| live.clone().eq("status", status);

    Ok(ContentCounts {
        total: db.count::<Content>(&live).await?,
        active: db.count::<Content>(&with_status(ContentStatus::Active)).await?,
        removed: db.count::<Content>(&with_status(ContentStatus::Removed)).await?,
        reported: db.count::<Content>(&with_status(ContentStatus::Reported)).await?,
    })
}

/// Platform-wide counters for the admin overview
pub async fn dashboard(db: &Db) -> AppResult<Dashboard> {
    let dashboard = Dashboard {
        users: user_counts(db).await?,
        content: content_counts(db).await?,
        orders: orders::stats(db).await?,
        wallets: wallets::stats(db).await?,
        moderation: moderation::stats(db).await?,
        live: LiveCounts {
            live_now: db
                .count::<LiveStream>(&Query::new().eq("status", LiveStatus::Live))
                .await?,
            scheduled: db
                .count::<LiveStream>(&Query::new().eq("status", LiveStatus::Scheduled))
                .await?,
        },
    };
    tracing::debug!(users = dashboard.users.total, "Admin dashboard built");
    Ok(dashboard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Cache;
    use crate::services::content::{self, tests::video_input};
    use crate::services::stores::tests::seed_seller;
    use crate::services::users::tests::{seed_user, user};

    #[tokio::test]
    async fn test_dashboard_counts() {
        let db = Db::memory();
        seed_user(&db, "ann").await;
        seed_seller(&db, "sam").await;
        let mut banned = user("troll");
        banned.status = UserStatus::Banned;
        db.insert(&banned).await.unwrap();

        let clip = content::create(&db, &Cache::disabled(), "ann", video_input("hi"))
            .await
            .unwrap();
        content::create(&db, &Cache::disabled(), "ann", video_input("again"))
            .await
            .unwrap();
        content::set_status(&db, &clip.id, ContentStatus::Removed).await.unwrap();

        let dashboard = dashboard(&db).await.unwrap();
        assert_eq!(dashboard.users.total, 3);
        assert_eq!(dashboard.users.banned, 1);
        assert_eq!(dashboard.users.sellers, 1);
        assert_eq!(dashboard.users.new_this_week, 3);
        assert_eq!(dashboard.content.total, 2);
        assert_eq!(dashboard.content.active, 1);
        assert_eq!(dashboard.content.removed, 1);
        assert_eq!(dashboard.orders.total_orders, 0);
        assert_eq!(dashboard.live.live_now, 0);
    }
}
