//! Hybrid content recommendations.
//!
//! Four sources each produce a ranked list of content. A list is normalised
//! by rank (`1 - i/n`) and weighted, and the weighted scores are summed per item.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{
    cached,
    db::{Cache, CacheKey, Db, Direction, Query},
    error::AppResult,
    models::{Activity, ActivityKind, Content, ContentStatus, Like, PageParams},
    services::{activity, feed},
};

pub const RECOMMENDATIONS_CACHE_TTL_SECS: u64 = 900;
pub const DEFAULT_RECOMMENDATION_LIMIT: usize = 20;
pub const MAX_RECOMMENDATION_LIMIT: usize = 100;

const HISTORY: usize = 100;
const WATCH_HISTORY: usize = 500;
const TOP_CATEGORIES: usize = 3;
const FAVORITE_CREATORS: usize = 10;
const SOURCE_POOL: usize = 50;
const TRENDING_WINDOW_HOURS: u32 = 24;
const SHORT_WATCH_SECS: f64 = 30.0;
const LONG_WATCH_SECS: f64 = 180.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Collaborative,
    ContentBased,
    Trending,
    Following,
}

impl RecommendationSource {
    pub fn weight(self) -> f64 {
        match self {
            RecommendationSource::Collaborative => 0.4,
            RecommendationSource::ContentBased => 0.3,
            RecommendationSource::Trending => 0.2,
            RecommendationSource::Following => 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreferredLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl PreferredLength {
    fn from_watch_secs(average: Option<f64>) -> Self {
        match average {
            Some(secs) if secs < SHORT_WATCH_SECS => PreferredLength::Short,
            Some(secs) if secs > LONG_WATCH_SECS => PreferredLength::Long,
            _ => PreferredLength::Medium,
        }
    }
}

/// Summary of recent behaviour, returned alongside the recommendations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    pub top_categories: Vec<String>,
    pub favorite_creators: Vec<String>,
    pub average_watch_secs: Option<f64>,
    pub preferred_length: PreferredLength,
    /// (likes + shares) / views, as a percentage
    pub engagement_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub content: Content,
    pub score: f64,
    pub reasons: Vec<RecommendationSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendations {
    pub items: Vec<Recommendation>,
    pub preferences: UserPreferences,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    pub limit: Option<usize>,
}

fn top_by_count(counts: HashMap<String, usize>, n: usize) -> Vec<String> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(key, _)| key).collect()
}

/// Derives preferences from view/like/share/comment history
pub fn analyze_preferences(history: &[Activity]) -> UserPreferences {
    let mut categories: HashMap<String, usize> = HashMap::new();
    let mut creators: HashMap<String, usize> = HashMap::new();
    let mut watch_total = 0.0;
    let mut watched = 0usize;
    let (mut views, mut likes, mut shares) = (0usize, 0usize, 0usize);

    for entry in history {
        if let Some(category) = &entry.category {
            *categories.entry(category.clone()).or_insert(0) += 1;
        }
        if let Some(creator) = &entry.creator_id {
            *creators.entry(creator.clone()).or_insert(0) += 1;
        }
        match entry.kind {
            ActivityKind::View => {
                views += 1;
                if let Some(secs) = entry.watch_secs {
                    watch_total += secs;
                    watched += 1;
                }
            }
            ActivityKind::Like => likes += 1,
            ActivityKind::Share => shares += 1,
            _ => {}
        }
    }

    let average_watch_secs = (watched > 0).then(|| watch_total / watched as f64);
    let engagement_rate = if views > 0 {
        ((likes + shares) as f64 / views as f64 * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    };

    UserPreferences {
        top_categories: top_by_count(categories, TOP_CATEGORIES),
        favorite_creators: top_by_count(creators, FAVORITE_CREATORS),
        average_watch_secs,
        preferred_length: PreferredLength::from_watch_secs(average_watch_secs),
        engagement_rate,
    }
}

/// Scores a ranked list as `1 - i/n`
pub fn rank_scores<T>(ranked: &[T]) -> Vec<f64> {
    let n = ranked.len() as f64;
    (0..ranked.len()).map(|i| 1.0 - i as f64 / n).collect()
}

// ============================================================================
// Sources
// ============================================================================

/// Content liked by users who share likes with this user, most co-likers first
async fn collaborative(db: &Db, user_id: &str) -> AppResult<Vec<Content>> {
    let mine: Vec<String> = db
        .find::<Like>(
            &Query::new()
                .eq("user_id", user_id)
                .order_by("created_at", Direction::Desc)
                .limit(HISTORY),
        )
        .await?
        .into_iter()
        .map(|like| like.content_id)
        .collect();
    if mine.is_empty() {
        return Ok(Vec::new());
    }

    let co_likers: HashSet<String> = db
        .find::<Like>(
            &Query::new()
                .is_in("content_id", &mine)
                .ne("user_id", user_id),
        )
        .await?
        .into_iter()
        .map(|like| like.user_id)
        .collect();
    if co_likers.is_empty() {
        return Ok(Vec::new());
    }

    let already: HashSet<&String> = mine.iter().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for like in db
        .find::<Like>(&Query::new().is_in("user_id", &co_likers))
        .await?
    {
        if !already.contains(&like.content_id) {
            *counts.entry(like.content_id).or_insert(0) += 1;
        }
    }

    let mut items = Vec::new();
    for id in top_by_count(counts, SOURCE_POOL) {
        if let Some(content) = db.get::<Content>(&id).await? {
            items.push(content);
        }
    }
    Ok(items)
}

/// Recent public content in the favourite categories, best category first
async fn content_based(db: &Db, categories: &[String]) -> AppResult<Vec<Content>> {
    let per_category = (SOURCE_POOL / categories.len().max(1)).max(1);
    let mut items = Vec::new();
    for category in categories {
        items.extend(
            db.find::<Content>(
                &Query::new()
                    .eq("category", category)
                    .eq("status", ContentStatus::Active)
                    .eq("is_deleted", false)
                    .eq("is_private", false)
                    .order_by("created_at", Direction::Desc)
                    .limit(per_category),
            )
            .await?,
        );
    }
    Ok(items)
}

// ============================================================================
// Recommend
// ============================================================================

async fn build(db: &Db, cache: &Cache, user_id: &str) -> AppResult<Recommendations> {
    // 1. Preferences
    let history = activity::recent_for_user(
        db,
        user_id,
        &[
            ActivityKind::View,
            ActivityKind::Like,
            ActivityKind::Share,
            ActivityKind::Comment,
        ],
        HISTORY,
    )
    .await?;
    let preferences = analyze_preferences(&history);

    // 2. Sources
    let sources = [
        (RecommendationSource::Collaborative, collaborative(db, user_id).await?),
        (
            RecommendationSource::ContentBased,
            content_based(db, &preferences.top_categories).await?,
        ),
        (
            RecommendationSource::Trending,
            feed::trending(db, cache, TRENDING_WINDOW_HOURS, SOURCE_POOL).await?,
        ),
        (
            RecommendationSource::Following,
            feed::following_feed(db, user_id, &PageParams::new(1, SOURCE_POOL))
                .await?
                .items,
        ),
    ];

    // 3. Exclusions
    let watched: HashSet<String> =
        activity::recent_for_user(db, user_id, &[ActivityKind::View], WATCH_HISTORY)
            .await?
            .into_iter()
            .map(|view| view.target_id)
            .collect();

    // 4. Weighted merge
    let mut merged: HashMap<String, Recommendation> = HashMap::new();
    for (source, items) in sources {
        let items: Vec<Content> = items
            .into_iter()
            .filter(|c| c.is_public() && c.user_id != user_id && !watched.contains(&c.id))
            .collect();
        let scores = rank_scores(&items);
        for (content, score) in items.into_iter().zip(scores) {
            let entry = merged
                .entry(content.id.clone())
                .or_insert_with(|| Recommendation {
                    content,
                    score: 0.0,
                    reasons: Vec::new(),
                });
            if !entry.reasons.contains(&source) {
                entry.score += score * source.weight();
                entry.reasons.push(source);
            }
        }
    }

    let mut items: Vec<Recommendation> = merged.into_values().collect();
    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.content.created_at.cmp(&a.content.created_at))
    });
    items.truncate(MAX_RECOMMENDATION_LIMIT);

    Ok(Recommendations { items, preferences })
}

/// Recommendations for a signed-in user, cached for 15 minutes
pub async fn recommend(db: &Db, cache: &Cache, user_id: &str, limit: Option<usize>) -> AppResult<Recommendations> {
    let limit = limit
        .unwrap_or(DEFAULT_RECOMMENDATION_LIMIT)
        .clamp(1, MAX_RECOMMENDATION_LIMIT);
    let key = CacheKey::Recommendations(user_id.to_string());
    let mut recommendations: Recommendations = cached!(
        cache,
        key,
        RECOMMENDATIONS_CACHE_TTL_SECS,
        build(db, cache, user_id)
    );
    recommendations.items.truncate(limit);

    tracing::debug!(user_id, items = recommendations.items.len(), "Recommendations served");
    Ok(recommendations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::content::{self, tests::video_input};
    use crate::services::users::tests::seed_user;
    use crate::services::{activity::new_activity, users};

    fn entry(kind: ActivityKind, category: Option<&str>, creator: &str, watch: Option<f64>) -> Activity {
        Activity {
            creator_id: Some(creator.to_string()),
            category: category.map(str::to_string),
            watch_secs: watch,
            ..new_activity("u1", kind, "c")
        }
    }

    async fn post(db: &Db, owner: &str, category: &str) -> Content {
        let mut input = video_input("clip");
        input.category = Some(category.to_string());
        content::create(db, &Cache::disabled(), owner, input).await.unwrap()
    }

    #[test]
    fn test_analyze_preferences() {
        let history = vec![
            entry(ActivityKind::View, Some("music"), "ann", Some(10.0)),
            entry(ActivityKind::View, Some("music"), "ann", Some(20.0)),
            entry(ActivityKind::View, Some("comedy"), "ben", None),
            entry(ActivityKind::Like, Some("music"), "ann", None),
            entry(ActivityKind::Share, Some("sports"), "cat", None),
            entry(ActivityKind::Comment, Some("dance"), "cat", None),
        ];
        let prefs = analyze_preferences(&history);
        assert_eq!(prefs.top_categories[0], "music");
        assert_eq!(prefs.top_categories.len(), 3);
        assert_eq!(prefs.favorite_creators[0], "ann");
        assert_eq!(prefs.average_watch_secs, Some(15.0));
        assert_eq!(prefs.preferred_length, PreferredLength::Short);
        // 2 / 3 views
        assert_eq!(prefs.engagement_rate, 66.67);

        let empty = analyze_preferences(&[]);
        assert_eq!(empty.preferred_length, PreferredLength::Medium);
        assert_eq!(empty.engagement_rate, 0.0);
    }

    #[test]
    fn test_rank_scores() {
        assert_eq!(rank_scores(&["a", "b", "c", "d"]), vec![1.0, 0.75, 0.5, 0.25]);
        assert!(rank_scores::<u8>(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_recommend_blends_sources_and_excludes_seen() {
        let db = Db::memory();
        let cache = Cache::disabled();
        for id in ["me", "twin", "ann", "ben"] {
            seed_user(&db, id).await;
        }
        let me = db.require::<crate::models::User>("me").await.unwrap().into_inner();
        let twin = db.require::<crate::models::User>("twin").await.unwrap().into_inner();

        let shared = post(&db, "ann", "music").await;
        let twin_pick = post(&db, "ben", "comedy").await;
        let music = post(&db, "ben", "music").await;
        let seen = post(&db, "ann", "music").await;
        let own = post(&db, "me", "music").await;

        content::like(&db, &shared.id, &me).await.unwrap();
        content::like(&db, &shared.id, &twin).await.unwrap();
        content::like(&db, &twin_pick.id, &twin).await.unwrap();
        content::record_view(&db, &seen.id, Some(&me), Some(12.0)).await.unwrap();
        users::follow(&db, &cache, "me", "ben").await.unwrap();

        let recs = recommend(&db, &cache, "me", None).await.unwrap();
        let ids: Vec<&str> = recs.items.iter().map(|r| r.content.id.as_str()).collect();
        assert!(!ids.contains(&seen.id.as_str()));
        assert!(!ids.contains(&own.id.as_str()));
        assert_eq!(ids[0], twin_pick.id);

        let pick = &recs.items[0];
        assert!(pick.reasons.contains(&RecommendationSource::Collaborative));
        assert!(pick.reasons.contains(&RecommendationSource::Following));
        let music_rec = recs.items.iter().find(|r| r.content.id == music.id).unwrap();
        assert!(music_rec.reasons.contains(&RecommendationSource::ContentBased));
        assert_eq!(recs.preferences.top_categories[0], "music");

        let one = recommend(&db, &cache, "me", Some(1)).await.unwrap();
        assert_eq!(one.items.len(), 1);
    }
}
