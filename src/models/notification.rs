use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;
use crate::models::Role;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_BODY_LEN: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Mention,
    Message,
    Gift,
    Order,
    Live,
    System,
    Announcement,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// One entry in a user's inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Who caused it; `None` for system messages
    pub actor_id: Option<String>,
    /// Content, stream, order or campaign the notification points at
    pub reference: Option<String>,
    pub action_url: Option<String>,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// Set for admin broadcasts
    pub campaign_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document for Notification {
    const COLLECTION: &'static str = "notifications";
    const NAME: &'static str = "Notification";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Who an admin broadcast goes to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipients {
    /// Every active account
    All,
    Role { role: Role },
    Users { ids: Vec<String> },
}

/// Record of an admin send, kept for history and stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationCampaign {
    pub id: String,
    pub sent_by: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub recipients: Recipients,
    pub delivered: usize,
    pub created_at: DateTime<Utc>,
}

impl Document for NotificationCampaign {
    const COLLECTION: &'static str = "notification_campaigns";
    const NAME: &'static str = "Notification campaign";

    fn id(&self) -> &str {
        &self.id
    }
}
