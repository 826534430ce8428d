use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    db::{with_retry, Cache, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        content::{normalize_hashtags, DEFAULT_FEED_SCORE, MAX_CAPTION_LEN},
        new_id, ActivityKind, Content, ContentKind, ContentStats, ContentStatus, Like, Page,
        PageParams, PostType, User,
    },
    services::{activity, feed},
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateContentInput {
    pub kind: Option<ContentKind>,
    pub post_type: Option<PostType>,
    pub caption: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub category: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub embedding: Option<Vec<f32>>,
    pub is_private: Option<bool>,
    pub allow_comments: Option<bool>,
    /// Save without publishing
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentPatch {
    pub caption: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub category: Option<String>,
    pub thumbnail_url: Option<String>,
    pub is_private: Option<bool>,
    pub allow_comments: Option<bool>,
    /// Owners may publish a draft, archive, or restore an archived post
    pub status: Option<ContentStatus>,
}

#[derive(Debug, Serialize)]
pub struct LikeResult {
    pub liked: bool,
    pub likes: u64,
}

fn validate_caption(caption: &str) -> AppResult<()> {
    if caption.chars().count() > MAX_CAPTION_LEN {
        return Err(AppError::invalid(format!(
            "Caption must be at most {} characters",
            MAX_CAPTION_LEN
        )));
    }
    Ok(())
}

fn is_owner_or_admin(content: &Content, viewer: Option<&User>) -> bool {
    viewer.is_some_and(|v| v.id == content.user_id || v.role.is_admin())
}

/// Whether `viewer` may see the content at all
pub fn can_view(content: &Content, viewer: Option<&User>) -> bool {
    if is_owner_or_admin(content, viewer) {
        return true;
    }
    !content.is_deleted
        && !content.is_private
        && matches!(
            content.status,
            ContentStatus::Active | ContentStatus::Reported
        )
}

/// Loads content the viewer may interact with, hiding the rest as not found
pub async fn require_visible(db: &Db, content_id: &str, viewer: Option<&User>) -> AppResult<Content> {
    let content = db.require::<Content>(content_id).await?.into_inner();
    if !can_view(&content, viewer) {
        return Err(AppError::not_found("Content not found"));
    }
    Ok(content)
}

pub async fn create(db: &Db, cache: &Cache, user_id: &str, input: CreateContentInput) -> AppResult<Content> {
    // 1. Validate
    let caption = input.caption.unwrap_or_default();
    validate_caption(&caption)?;
    let kind = input.kind.unwrap_or_default();
    match kind {
        ContentKind::Text if caption.trim().is_empty() => {
            return Err(AppError::invalid("Text posts need a caption"));
        }
        ContentKind::Video | ContentKind::Image if input.media_urls.is_empty() => {
            return Err(AppError::invalid("At least one media URL is required"));
        }
        _ => {}
    }
    if input.duration_secs.is_some_and(|d| d < 0.0 || !d.is_finite()) {
        return Err(AppError::invalid("Duration must be a non-negative number"));
    }

    // 2. Build the document
    let now = Utc::now();
    let hashtags = normalize_hashtags(&caption, &input.hashtags.unwrap_or_default());
    let content = Content {
        id: new_id(),
        user_id: user_id.to_string(),
        kind,
        post_type: input.post_type.unwrap_or_default(),
        caption,
        hashtags,
        category: input.category.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty()),
        media_urls: input.media_urls,
        thumbnail_url: input.thumbnail_url,
        duration_secs: input.duration_secs,
        embedding: input.embedding.filter(|e| !e.is_empty()),
        is_private: input.is_private.unwrap_or(false),
        allow_comments: input.allow_comments.unwrap_or(true),
        status: if input.draft {
            ContentStatus::Draft
        } else {
            ContentStatus::Active
        },
        is_deleted: false,
        stats: ContentStats::default(),
        report_count: 0,
        feed_score: DEFAULT_FEED_SCORE,
        moderation_score: 0.0,
        created_at: now,
        updated_at: now,
    };

    // 3. Content and the author's post count in one commit
    with_retry("create_content", || async {
        let mut author = db.require::<User>(user_id).await?;
        author.stats.posts += 1;
        let mut batch = db.batch();
        batch.insert(&content)?;
        batch.update(&author)?;
        batch.commit().await
    })
    .await?;

    feed::invalidate(cache, user_id).await;
    tracing::info!(content_id = %content.id, user_id, kind = ?content.kind, "Content created");
    Ok(content)
}

pub async fn get(db: &Db, content_id: &str, viewer: Option<&User>) -> AppResult<Content> {
    require_visible(db, content_id, viewer).await
}

pub async fn update(db: &Db, content_id: &str, user: &User, patch: ContentPatch) -> AppResult<Content> {
    if let Some(caption) = &patch.caption {
        validate_caption(caption)?;
    }

    let content = with_retry("update_content", || async {
        let mut content = db.require::<Content>(content_id).await?;
        if content.is_deleted {
            return Err(AppError::not_found("Content not found"));
        }
        if content.user_id != user.id {
            return Err(AppError::forbidden("NOT_OWNER", "You can only edit your own content"));
        }

        if let Some(caption) = &patch.caption {
            content.caption = caption.clone();
        }
        if patch.caption.is_some() || patch.hashtags.is_some() {
            let explicit = patch.hashtags.clone().unwrap_or_default();
            content.hashtags = normalize_hashtags(&content.caption, &explicit);
        }
        if let Some(category) = &patch.category {
            content.category = Some(category.trim().to_lowercase()).filter(|c| !c.is_empty());
        }
        if let Some(thumbnail) = &patch.thumbnail_url {
            content.thumbnail_url = Some(thumbnail.clone());
        }
        if let Some(is_private) = patch.is_private {
            content.is_private = is_private;
        }
        if let Some(allow) = patch.allow_comments {
            content.allow_comments = allow;
        }
        if let Some(status) = patch.status {
            let allowed = matches!(
                (content.status, status),
                (ContentStatus::Draft, ContentStatus::Active)
                    | (ContentStatus::Active, ContentStatus::Archived)
                    | (ContentStatus::Archived, ContentStatus::Active)
            );
            if !allowed && content.status != status {
                return Err(AppError::InvalidTransition(format!(
                    "Cannot change content from {:?} to {:?}",
                    content.status, status
                )));
            }
            content.status = status;
        }
        content.updated_at = Utc::now();
        db.update(&content).await?;
        Ok(content.into_inner())
    })
    .await?;

    tracing::info!(content_id, user_id = %user.id, "Content updated");
    Ok(content)
}

/// Soft delete by the owner or an admin
pub async fn delete(db: &Db, cache: &Cache, content_id: &str, user: &User) -> AppResult<()> {
    let owner_id = with_retry("delete_content", || async {
        let mut content = db.require::<Content>(content_id).await?;
        if content.is_deleted {
            return Err(AppError::not_found("Content not found"));
        }
        if content.user_id != user.id && !user.role.is_admin() {
            return Err(AppError::forbidden(
                "NOT_OWNER",
                "You can only delete your own content",
            ));
        }

        content.is_deleted = true;
        content.updated_at = Utc::now();

        let mut batch = db.batch();
        batch.update(&content)?;
        if let Some(mut author) = db.get_versioned::<User>(&content.user_id).await? {
            author.stats.posts = author.stats.posts.saturating_sub(1);
            batch.update(&author)?;
        }
        batch.commit().await?;
        Ok(content.user_id.clone())
    })
    .await?;

    feed::invalidate(cache, &owner_id).await;
    tracing::info!(content_id, deleted_by = %user.id, "Content deleted");
    Ok(())
}

/// Posts by a user; owners and admins also see drafts and private posts
pub async fn list_by_user(
    db: &Db,
    user_id: &str,
    viewer: Option<&User>,
    params: &PageParams,
) -> AppResult<Page<Content>> {
    let sees_all = viewer.is_some_and(|v| v.id == user_id || v.role.is_admin());
    let mut query = Query::new()
        .eq("user_id", user_id)
        .eq("is_deleted", false)
        .order_by("created_at", Direction::Desc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    if !sees_all {
        query = query
            .eq("status", ContentStatus::Active)
            .eq("is_private", false);
    }

    let items = db.find::<Content>(&query).await?;
    Ok(Page::from_overfetch(items, params))
}

pub async fn by_hashtag(db: &Db, tag: &str, params: &PageParams) -> AppResult<Page<Content>> {
    let tag = tag.trim().trim_start_matches('#').to_lowercase();
    if tag.is_empty() {
        return Err(AppError::invalid("Hashtag is required"));
    }
    let items = db
        .find::<Content>(
            &Query::new()
                .contains("hashtags", &tag)
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

/// Likes content; liking twice is a no-op
pub async fn like(db: &Db, content_id: &str, user: &User) -> AppResult<LikeResult> {
    let result = with_retry("like_content", || async {
        let mut content = db.require::<Content>(content_id).await?;
        if !can_view(&content, Some(user)) || content.status != ContentStatus::Active {
            return Err(AppError::not_found("Content not found"));
        }

        let like_id = Like::doc_id(&user.id, content_id);
        if db.get::<Like>(&like_id).await?.is_some() {
            return Ok(LikeResult {
                liked: true,
                likes: content.stats.likes,
            });
        }

        content.stats.likes += 1;
        feed::refresh_feed_score(&mut content, Utc::now());

        let mut batch = db.batch();
        batch.insert(&Like {
            id: like_id,
            user_id: user.id.clone(),
            content_id: content_id.to_string(),
            created_at: Utc::now(),
        })?;
        batch.update(&content)?;
        if let Some(mut owner) = db.get_versioned::<User>(&content.user_id).await? {
            owner.stats.likes_received += 1;
            batch.update(&owner)?;
        }
        batch.insert(&activity::content_activity(&user.id, ActivityKind::Like, &content))?;
        batch.commit().await?;

        Ok(LikeResult {
            liked: true,
            likes: content.stats.likes,
        })
    })
    .await?;

    tracing::debug!(content_id, user_id = %user.id, likes = result.likes, "Content liked");
    Ok(result)
}

pub async fn unlike(db: &Db, content_id: &str, user: &User) -> AppResult<LikeResult> {
    with_retry("unlike_content", || async {
        let mut content = db.require::<Content>(content_id).await?;
        let Some(like) = db
            .get_versioned::<Like>(&Like::doc_id(&user.id, content_id))
            .await?
        else {
            return Ok(LikeResult {
                liked: false,
                likes: content.stats.likes,
            });
        };

        content.stats.likes = content.stats.likes.saturating_sub(1);
        feed::refresh_feed_score(&mut content, Utc::now());

        let mut batch = db.batch();
        batch.delete_versioned(&like);
        batch.update(&content)?;
        if let Some(mut owner) = db.get_versioned::<User>(&content.user_id).await? {
            owner.stats.likes_received = owner.stats.likes_received.saturating_sub(1);
            batch.update(&owner)?;
        }
        batch.commit().await?;

        Ok(LikeResult {
            liked: false,
            likes: content.stats.likes,
        })
    })
    .await
}

pub async fn share(db: &Db, content_id: &str, user: &User) -> AppResult<u64> {
    with_retry("share_content", || async {
        let mut content = db.require::<Content>(content_id).await?;
        if !can_view(&content, Some(user)) {
            return Err(AppError::not_found("Content not found"));
        }
        content.stats.shares += 1;
        feed::refresh_feed_score(&mut content, Utc::now());

        let mut batch = db.batch();
        batch.update(&content)?;
        batch.insert(&activity::content_activity(&user.id, ActivityKind::Share, &content))?;
        batch.commit().await?;
        Ok(content.stats.shares)
    })
    .await
}

/// Counts a view; signed-in viewers also get a view activity with watch time
pub async fn record_view(
    db: &Db,
    content_id: &str,
    viewer: Option<&User>,
    watch_secs: Option<f64>,
) -> AppResult<u64> {
    if watch_secs.is_some_and(|w| w < 0.0 || !w.is_finite()) {
        return Err(AppError::invalid("Watch time must be a non-negative number"));
    }

    with_retry("record_view", || async {
        let mut content = db.require::<Content>(content_id).await?;
        if !can_view(&content, viewer) {
            return Err(AppError::not_found("Content not found"));
        }
        content.stats.views += 1;

        let mut batch = db.batch();
        batch.update(&content)?;
        if let Some(viewer) = viewer {
            let mut view = activity::content_activity(&viewer.id, ActivityKind::View, &content);
            view.watch_secs = watch_secs;
            batch.insert(&view)?;
        }
        batch.commit().await?;
        Ok(content.stats.views)
    })
    .await
}

/// Admin override of a content status (e.g. restoring removed content)
pub async fn set_status(db: &Db, content_id: &str, status: ContentStatus) -> AppResult<Content> {
    let content = with_retry("set_content_status", || async {
        let mut content = db.require::<Content>(content_id).await?;
        content.status = status;
        content.updated_at = Utc::now();
        db.update(&content).await?;
        Ok(content.into_inner())
    })
    .await?;
    tracing::info!(content_id, status = ?status, "Content status set");
    Ok(content)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::users::tests::seed_user;

    pub(crate) fn video_input(caption: &str) -> CreateContentInput {
        CreateContentInput {
            caption: Some(caption.to_string()),
            media_urls: vec!["https://cdn.example.com/v.mp4".to_string()],
            duration_secs: Some(42.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_extracts_hashtags_and_counts_posts() {
        let db = Db::memory();
        let cache = Cache::disabled();
        seed_user(&db, "alice").await;

        let content = create(&db, &cache, "alice", video_input("Hello #World #rust"))
            .await
            .unwrap();
        assert_eq!(content.hashtags, vec!["world", "rust"]);
        assert_eq!(content.status, ContentStatus::Active);
        assert_eq!(content.feed_score, DEFAULT_FEED_SCORE);

        let alice = db.require::<User>("alice").await.unwrap();
        assert_eq!(alice.stats.posts, 1);
    }

    #[tokio::test]
    async fn test_create_validates_media_and_caption() {
        let db = Db::memory();
        let cache = Cache::disabled();
        seed_user(&db, "alice").await;

        let no_media = CreateContentInput::default();
        assert!(create(&db, &cache, "alice", no_media).await.is_err());

        let long = video_input(&"x".repeat(MAX_CAPTION_LEN + 1));
        assert!(create(&db, &cache, "alice", long).await.is_err());
    }

    #[tokio::test]
    async fn test_private_and_deleted_content_hidden() {
        let db = Db::memory();
        let cache = Cache::disabled();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;

        let mut input = video_input("secret");
        input.is_private = Some(true);
        let private = create(&db, &cache, "alice", input).await.unwrap();
        assert!(get(&db, &private.id, Some(&alice)).await.is_ok());
        assert!(matches!(
            get(&db, &private.id, Some(&bob)).await,
            Err(AppError::NotFound(_))
        ));

        let public = create(&db, &cache, "alice", video_input("hi")).await.unwrap();
        assert!(matches!(
            delete(&db, &cache, &public.id, &bob).await,
            Err(AppError::Forbidden { .. })
        ));
        delete(&db, &cache, &public.id, &alice).await.unwrap();
        assert!(get(&db, &public.id, None).await.is_err());

        let alice = db.require::<User>("alice").await.unwrap();
        assert_eq!(alice.stats.posts, 1);
    }

    #[tokio::test]
    async fn test_like_is_idempotent_and_credits_owner() {
        let db = Db::memory();
        let cache = Cache::disabled();
        seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let content = create(&db, &cache, "alice", video_input("hi")).await.unwrap();

        assert_eq!(like(&db, &content.id, &bob).await.unwrap().likes, 1);
        assert_eq!(like(&db, &content.id, &bob).await.unwrap().likes, 1);
        assert_eq!(
            db.require::<User>("alice").await.unwrap().stats.likes_received,
            1
        );

        let result = unlike(&db, &content.id, &bob).await.unwrap();
        assert!(!result.liked);
        assert_eq!(result.likes, 0);
        assert_eq!(
            db.require::<User>("alice").await.unwrap().stats.likes_received,
            0
        );
    }

    #[tokio::test]
    async fn test_record_view_writes_activity() {
        let db = Db::memory();
        let cache = Cache::disabled();
        seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let content = create(&db, &cache, "alice", video_input("#cats")).await.unwrap();

        assert_eq!(record_view(&db, &content.id, None, None).await.unwrap(), 1);
        assert_eq!(
            record_view(&db, &content.id, Some(&bob), Some(12.5)).await.unwrap(),
            2
        );
        let views = activity::recent_for_user(&db, "bob", &[ActivityKind::View], 10)
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].watch_secs, Some(12.5));
        assert_eq!(views[0].hashtags, vec!["cats"]);
    }

    #[tokio::test]
    async fn test_by_hashtag_and_list_by_user() {
        let db = Db::memory();
        let cache = Cache::disabled();
        let alice = seed_user(&db, "alice").await;
        create(&db, &cache, "alice", video_input("#Travel one")).await.unwrap();
        let mut draft = video_input("#travel draft");
        draft.draft = true;
        create(&db, &cache, "alice", draft).await.unwrap();

        let tagged = by_hashtag(&db, "#TRAVEL", &PageParams::default()).await.unwrap();
        assert_eq!(tagged.items.len(), 1);

        let public = list_by_user(&db, "alice", None, &PageParams::default()).await.unwrap();
        assert_eq!(public.items.len(), 1);
        let own = list_by_user(&db, "alice", Some(&alice), &PageParams::default())
            .await
            .unwrap();
        assert_eq!(own.items.len(), 2);
    }

    #[tokio::test]
    async fn test_update_owner_only_and_status_rules() {
        let db = Db::memory();
        let cache = Cache::disabled();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let content = create(&db, &cache, "alice", video_input("hi")).await.unwrap();

        let patch = ContentPatch {
            caption: Some("new #tag".to_string()),
            ..Default::default()
        };
        assert!(update(&db, &content.id, &bob, patch).await.is_err());

        let patch = ContentPatch {
            caption: Some("new #tag".to_string()),
            status: Some(ContentStatus::Archived),
            ..Default::default()
        };
        let updated = update(&db, &content.id, &alice, patch).await.unwrap();
        assert_eq!(updated.hashtags, vec!["tag"]);
        assert_eq!(updated.status, ContentStatus::Archived);

        let patch = ContentPatch {
            status: Some(ContentStatus::Removed),
            ..Default::default()
        };
        assert!(matches!(
            update(&db, &content.id, &alice, patch).await,
            Err(AppError::InvalidTransition(_))
        ));
    }
}
