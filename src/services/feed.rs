//! Personalised feed ranking, trending lists and feed-score maintenance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{
    cached,
    db::{Cache, CacheKey, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{ActivityKind, Content, ContentStatus, Page, PageParams, User},
    services::{activity, users},
};

pub const FEED_CACHE_TTL_SECS: u64 = 300;
pub const PREFS_CACHE_TTL_SECS: u64 = 600;
pub const TRENDING_CACHE_TTL_SECS: u64 = 300;

pub const DEFAULT_FEED_LIMIT: usize = 20;
pub const MAX_FEED_LIMIT: usize = 50;
/// Candidates fetched per requested item
const CANDIDATE_FACTOR: usize = 5;
const PREFERENCE_HISTORY: usize = 50;
const TOP_HASHTAGS: usize = 10;
const TRENDING_POOL: usize = 50;

/// Creators past this many items in one page get their score halved
const MAX_ITEMS_PER_CREATOR: usize = 3;

const ANONYMOUS: &str = "anonymous";

/// What the ranking knows about the viewer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedPreferences {
    pub favorite_hashtags: Vec<String>,
    /// Mean embedding of recently viewed content
    pub embedding: Option<Vec<f32>>,
    /// Followed creators
    pub favorite_creators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredContent {
    pub content: Content,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Cache,
    Generated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<ScoredContent>,
    pub has_more: bool,
    /// Pass back as `cursor` to continue after this page
    pub cursor: Option<String>,
    pub source: FeedSource,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedRequest {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
}

// ============================================================================
// Scoring primitives
// ============================================================================

/// 100 for brand-new content, halving every 24 hours
pub fn recency_score(age_hours: f64) -> f64 {
    100.0 * (-(std::f64::consts::LN_2 / 24.0) * age_hours.max(0.0)).exp()
}

pub fn moderation_penalty(moderation_score: f64) -> f64 {
    if moderation_score > 50.0 {
        (moderation_score - 50.0) / 2.0
    } else {
        0.0
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_seconds().max(0) as f64 / 3600.0
}

/// Baseline rank kept on the content document, refreshed on interactions
pub fn refresh_feed_score(content: &mut Content, now: DateTime<Utc>) {
    let score = 0.4 * content.stats.engagement_rate()
        + 0.3 * recency_score(age_hours(content.created_at, now))
        + 0.3 * content.feed_score
        - moderation_penalty(content.moderation_score);
    content.feed_score = score.clamp(0.0, 100.0);
}

fn history_score(content: &Content, prefs: &FeedPreferences) -> f64 {
    let matching_tags = content
        .hashtags
        .iter()
        .filter(|tag| prefs.favorite_hashtags.contains(tag))
        .count() as f64;
    let creator_bonus = if prefs.favorite_creators.contains(&content.user_id) {
        30.0
    } else {
        0.0
    };
    (matching_tags * 20.0 + creator_bonus).min(100.0)
}

/// Personalised 0-100 score of one candidate
pub fn score_content(
    content: &Content,
    prefs: &FeedPreferences,
    creator_verified: bool,
    now: DateTime<Utc>,
) -> f64 {
    let following = if prefs.favorite_creators.contains(&content.user_id) {
        25.0
    } else {
        0.0
    };
    let similarity = match (&prefs.embedding, &content.embedding) {
        (Some(a), Some(b)) => cosine_similarity(a, b).max(0.0) * 20.0,
        _ => 0.0,
    };

    let mut score = following
        + similarity
        + content.stats.engagement_rate() * 0.20
        + recency_score(age_hours(content.created_at, now)) * 0.15
        + history_score(content, prefs) * 0.10;

    if content.feed_score > 0.0 {
        score = 0.7 * score + 0.3 * content.feed_score;
    }
    score -= moderation_penalty(content.moderation_score);
    if creator_verified {
        score += 5.0;
    }
    score.clamp(0.0, 100.0)
}

fn sort_by_score(items: &mut [ScoredContent]) {
    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.content.created_at.cmp(&a.content.created_at))
    });
}

/// Halves repeat creators past the third item and rewards unseen hashtags
pub fn apply_diversity(items: &mut Vec<ScoredContent>) {
    sort_by_score(items);

    let mut per_creator: HashMap<String, usize> = HashMap::new();
    let mut seen_tags: HashSet<String> = HashSet::new();
    for item in items.iter_mut() {
        let count = per_creator.entry(item.content.user_id.clone()).or_insert(0);
        *count += 1;
        if *count > MAX_ITEMS_PER_CREATOR {
            item.score /= 2.0;
        }
        for tag in &item.content.hashtags {
            if seen_tags.insert(tag.clone()) {
                item.score += 2.0;
            }
        }
    }

    sort_by_score(items);
}

// ============================================================================
// Preferences
// ============================================================================

async fn build_preferences(db: &Db, user_id: &str) -> AppResult<FeedPreferences> {
    let views = activity::recent_for_user(db, user_id, &[ActivityKind::View], PREFERENCE_HISTORY).await?;

    // 1. Hashtag frequencies
    let mut tag_counts: HashMap<String, usize> = HashMap::new();
    for view in &views {
        for tag in &view.hashtags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    let mut tags: Vec<(String, usize)> = tag_counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let favorite_hashtags = tags.into_iter().take(TOP_HASHTAGS).map(|(t, _)| t).collect();

    // 2. Mean embedding of distinct viewed items
    let mut seen = HashSet::new();
    let mut sum: Vec<f64> = Vec::new();
    let mut counted = 0usize;
    for view in &views {
        if !seen.insert(view.target_id.clone()) {
            continue;
        }
        let Some(content) = db.get::<Content>(&view.target_id).await? else {
            continue;
        };
        let Some(embedding) = content.embedding else {
            continue;
        };
        if sum.is_empty() {
            sum = vec![0.0; embedding.len()];
        }
        if embedding.len() != sum.len() {
            continue;
        }
        for (acc, v) in sum.iter_mut().zip(&embedding) {
            *acc += *v as f64;
        }
        counted += 1;
    }
    let embedding = (counted > 0).then(|| sum.iter().map(|v| (v / counted as f64) as f32).collect());

    // 3. Followed creators
    let favorite_creators = users::following_ids(db, user_id).await?;

    Ok(FeedPreferences {
        favorite_hashtags,
        embedding,
        favorite_creators,
    })
}

/// Viewer preferences, cached per user
pub async fn load_preferences(db: &Db, cache: &Cache, user_id: &str) -> AppResult<FeedPreferences> {
    let key = CacheKey::UserPrefs(user_id.to_string());
    Ok(cached!(cache, key, PREFS_CACHE_TTL_SECS, build_preferences(db, user_id)))
}

/// Drops cached feed and preferences after the user's graph or content changes
pub async fn invalidate(cache: &Cache, user_id: &str) {
    cache
        .invalidate(&[
            CacheKey::Feed(user_id.to_string()),
            CacheKey::UserPrefs(user_id.to_string()),
        ])
        .await;
}

// ============================================================================
// Feeds
// ============================================================================

async fn verified_creators(db: &Db, candidates: &[Content]) -> AppResult<HashSet<String>> {
    let creators: HashSet<&str> = candidates.iter().map(|c| c.user_id.as_str()).collect();
    let mut verified = HashSet::new();
    for creator in creators {
        if let Some(user) = db.get::<User>(creator).await? {
            if user.is_verified {
                verified.insert(user.id);
            }
        }
    }
    Ok(verified)
}

/// Ranked feed page for a viewer (`None` for anonymous)
pub async fn generate_feed(
    db: &Db,
    cache: &Cache,
    user_id: Option<&str>,
    request: &FeedRequest,
) -> AppResult<FeedPage> {
    let limit = request
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_FEED_LIMIT);
    let min_score = request.min_score.unwrap_or(0.0);
    let cache_key = CacheKey::Feed(user_id.unwrap_or(ANONYMOUS).to_string());
    let first_page = request.cursor.is_none() && request.min_score.is_none();

    // 1. Cached first page
    if first_page {
        if let Some(mut page) = cache.get_from_cache::<FeedPage>(&cache_key).await? {
            if page.items.len() >= limit || !page.has_more {
                page.items.truncate(limit);
                page.source = FeedSource::Cache;
                return Ok(page);
            }
        }
    }

    // 2. Candidates, newest first, older than the cursor item
    let fetch_limit = limit * CANDIDATE_FACTOR;
    let mut query = Query::new()
        .eq("status", ContentStatus::Active)
        .eq("is_deleted", false)
        .eq("is_private", false)
        .order_by("created_at", Direction::Desc)
        .limit(fetch_limit);
    if let Some(cursor) = &request.cursor {
        let anchor = db
            .get::<Content>(cursor)
            .await?
            .ok_or_else(|| AppError::invalid("Invalid feed cursor"))?;
        query = query.lt("created_at", anchor.created_at);
    }
    let candidates = db.find::<Content>(&query).await?;
    let exhausted = candidates.len() < fetch_limit;
    let next_cursor = candidates.last().map(|c| c.id.clone());

    // 3. Preferences
    let prefs = match user_id {
        Some(id) => load_preferences(db, cache, id).await?,
        None => FeedPreferences::default(),
    };
    let verified = verified_creators(db, &candidates).await?;

    // 4. Score and diversify
    let now = Utc::now();
    let mut scored: Vec<ScoredContent> = candidates
        .into_iter()
        .map(|content| {
            let score = score_content(&content, &prefs, verified.contains(&content.user_id), now);
            ScoredContent { content, score }
        })
        .collect();
    apply_diversity(&mut scored);

    // 5. Threshold and page
    scored.retain(|item| item.score >= min_score);
    let has_more = !exhausted || scored.len() > limit;
    scored.truncate(limit);

    let page = FeedPage {
        items: scored,
        has_more,
        cursor: if has_more { next_cursor } else { None },
        source: FeedSource::Generated,
    };

    if first_page {
        cache.set_in_background(&cache_key, &page, FEED_CACHE_TTL_SECS);
    }

    tracing::debug!(
        user_id = user_id.unwrap_or(ANONYMOUS),
        items = page.items.len(),
        has_more = page.has_more,
        "Feed generated"
    );
    Ok(page)
}

async fn rank_trending(db: &Db, window_hours: u32) -> AppResult<Vec<Content>> {
    let since = Utc::now() - Duration::hours(window_hours as i64);
    let mut items = db
        .find::<Content>(
            &Query::new()
                .eq("status", ContentStatus::Active)
                .eq("is_deleted", false)
                .eq("is_private", false)
                .gte("created_at", since),
        )
        .await?;
    items.sort_by(|a, b| {
        b.stats
            .trending_score()
            .total_cmp(&a.stats.trending_score())
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    items.truncate(TRENDING_POOL);
    Ok(items)
}

/// Most-engaged public content created within the window
pub async fn trending(
    db: &Db,
    cache: &Cache,
    window_hours: u32,
    limit: usize,
) -> AppResult<Vec<Content>> {
    let window_hours = window_hours.clamp(1, 24 * 30);
    let key = CacheKey::Trending(window_hours);
    let ranked: Vec<Content> =
        cached!(cache, key, TRENDING_CACHE_TTL_SECS, rank_trending(db, window_hours));
    Ok(ranked.into_iter().take(limit.clamp(1, TRENDING_POOL)).collect())
}

/// Newest posts from followed creators
pub async fn following_feed(db: &Db, user_id: &str, params: &PageParams) -> AppResult<Page<Content>> {
    let following = users::following_ids(db, user_id).await?;
    if following.is_empty() {
        return Ok(Page::from_overfetch(Vec::new(), params));
    }
    let items = db
        .find::<Content>(
            &Query::new()
                .is_in("user_id", following)
                .eq("status", ContentStatus::Active)
                .eq("is_deleted", false)
                .eq("is_private", false)
                .order_by("created_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Page::from_overfetch(items, params))
}
