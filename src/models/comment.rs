use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

pub const MAX_COMMENT_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    #[default]
    Approved,
    Pending,
    Hidden,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub content_id: String,
    pub user_id: String,
    /// Set on replies
    pub parent_id: Option<String>,
    pub text: String,
    pub status: CommentStatus,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Comment {
    const COLLECTION: &'static str = "comments";
    const NAME: &'static str = "Comment";

    fn id(&self) -> &str {
        &self.id
    }
}
