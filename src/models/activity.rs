use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    View,
    Like,
    Share,
    Comment,
    Follow,
    Purchase,
    Gift,
}

/// One user interaction, the raw signal for feed and recommendations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    pub kind: ActivityKind,
    pub target_id: String,
    /// Owner of the target (content creator, followed user, seller)
    pub creator_id: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub watch_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Document for Activity {
    const COLLECTION: &'static str = "activities";
    const NAME: &'static str = "Activity";

    fn id(&self) -> &str {
        &self.id
    }
}
