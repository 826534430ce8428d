use chrono::Utc;

use crate::{
    db::{Db, Direction, Query},
    error::AppResult,
    models::{new_id, Activity, ActivityKind, Content},
};

/// Builds an activity record without target metadata
pub fn new_activity(user_id: &str, kind: ActivityKind, target_id: &str) -> Activity {
    Activity {
        id: new_id(),
        user_id: user_id.to_string(),
        kind,
        target_id: target_id.to_string(),
        creator_id: None,
        category: None,
        hashtags: Vec::new(),
        watch_secs: None,
        created_at: Utc::now(),
    }
}

/// Activity on a piece of content, carrying its creator, category and tags
pub fn content_activity(user_id: &str, kind: ActivityKind, content: &Content) -> Activity {
    Activity {
        creator_id: Some(content.user_id.clone()),
        category: content.category.clone(),
        hashtags: content.hashtags.clone(),
        ..new_activity(user_id, kind, &content.id)
    }
}

pub async fn record(db: &Db, activity: &Activity) -> AppResult<()> {
    db.insert(activity).await?;
    tracing::debug!(
        user_id = %activity.user_id,
        kind = ?activity.kind,
        target_id = %activity.target_id,
        "Activity recorded"
    );
    Ok(())
}

/// Most recent activities of the given kinds (all kinds when empty), newest first
pub async fn recent_for_user(
    db: &Db,
    user_id: &str,
    kinds: &[ActivityKind],
    limit: usize,
) -> AppResult<Vec<Activity>> {
    let mut query = Query::new().eq("user_id", user_id);
    if !kinds.is_empty() {
        query = query.is_in("kind", kinds.iter().copied());
    }
    db.find(
        &query
            .order_by("created_at", Direction::Desc)
            .limit(limit),
    )
    .await
}
