use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LiveCategory {
    Gaming,
    Music,
    Sports,
    Education,
    Entertainment,
    Shopping,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LivePrivacy {
    #[default]
    Public,
    Followers,
    Private,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Scheduled,
    Live,
    Ended,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveStats {
    pub current_viewers: u64,
    pub peak_viewers: u64,
    /// Unique viewers who ever joined
    pub total_views: u64,
    pub likes: u64,
    pub gifts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStream {
    pub id: String,
    pub host_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: LiveCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub privacy: LivePrivacy,
    pub status: LiveStatus,
    /// Only ever returned to the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub stats: LiveStats,
    /// Products pinned for live shopping
    #[serde(default)]
    pub featured_products: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for LiveStream {
    const COLLECTION: &'static str = "live_streams";
    const NAME: &'static str = "Live stream";

    fn id(&self) -> &str {
        &self.id
    }
}

impl LiveStream {
    /// Strips the stream key unless the viewer is the host
    pub fn for_viewer(mut self, viewer_id: Option<&str>) -> Self {
        if viewer_id != Some(self.host_id.as_str()) {
            self.stream_key = None;
        }
        self
    }
}

/// Viewer membership, id `"{stream_id}_{user_id}"`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveViewer {
    pub id: String,
    pub stream_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    /// `None` while watching
    pub left_at: Option<DateTime<Utc>>,
}

impl Document for LiveViewer {
    const COLLECTION: &'static str = "live_viewers";
    const NAME: &'static str = "Live viewer";

    fn id(&self) -> &str {
        &self.id
    }
}

impl LiveViewer {
    pub fn doc_id(stream_id: &str, user_id: &str) -> String {
        format!("{}_{}", stream_id, user_id)
    }
}

/// Held while a host is broadcasting, id `"live_host_{host_id}"`; inserted
/// with the stream's move to live so two concurrent starts cannot both win
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveHostLock {
    pub id: String,
    pub host_id: String,
    pub stream_id: String,
    pub acquired_at: DateTime<Utc>,
}

impl Document for LiveHostLock {
    const COLLECTION: &'static str = "live_host_locks";
    const NAME: &'static str = "Live host lock";

    fn id(&self) -> &str {
        &self.id
    }
}

impl LiveHostLock {
    pub fn doc_id(host_id: &str) -> String {
        format!("live_host_{}", host_id)
    }
}
