use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::db::Document;

pub const MAX_CAPTION_LEN: usize = 2200;
pub const DEFAULT_FEED_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Video,
    Image,
    Text,
    Live,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Feed,
    Post,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Processing,
    #[default]
    Active,
    Removed,
    Reported,
    Archived,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentStats {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
}

impl ContentStats {
    /// Interaction rate as a percentage of views, capped at 100
    pub fn engagement_rate(&self) -> f64 {
        if self.views == 0 {
            return 0.0;
        }
        let interactions = self.likes as f64 + 2.0 * self.comments as f64 + 3.0 * self.shares as f64;
        (interactions / self.views as f64 * 100.0).min(100.0)
    }

    pub fn trending_score(&self) -> f64 {
        self.views as f64
            + 2.0 * self.likes as f64
            + 3.0 * self.comments as f64
            + 4.0 * self.shares as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub user_id: String,
    pub kind: ContentKind,
    pub post_type: PostType,
    #[serde(default)]
    pub caption: String,
    /// Lowercased, without `#`
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "default_true")]
    pub allow_comments: bool,
    pub status: ContentStatus,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub stats: ContentStats,
    #[serde(default)]
    pub report_count: u32,
    pub feed_score: f64,
    #[serde(default)]
    pub moderation_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Document for Content {
    const COLLECTION: &'static str = "content";
    const NAME: &'static str = "Content";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Content {
    /// Listed in feeds and searches
    pub fn is_public(&self) -> bool {
        self.status == ContentStatus::Active && !self.is_deleted && !self.is_private
    }
}

/// Like edge, id `"{user_id}_{content_id}"`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: String,
    pub user_id: String,
    pub content_id: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Like {
    const COLLECTION: &'static str = "likes";
    const NAME: &'static str = "Like";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Like {
    pub fn doc_id(user_id: &str, content_id: &str) -> String {
        format!("{}_{}", user_id, content_id)
    }
}

fn hashtag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("hashtag pattern is valid"))
}

/// Merges `#tags` found in the caption with explicit tags: lowercased,
/// leading `#` stripped, first occurrence order, no duplicates
pub fn normalize_hashtags(caption: &str, explicit: &[String]) -> Vec<String> {
    let from_caption = hashtag_pattern()
        .captures_iter(caption)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()));

    let mut tags: Vec<String> = Vec::new();
    for tag in from_caption.chain(explicit.iter().cloned()) {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}
