use chrono::Utc;
use serde::Deserialize;

use crate::{
    db::{with_retry, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        comment::MAX_COMMENT_LEN, new_id, ActivityKind, Audience, Comment, CommentStatus, Content,
        ContentStatus, Page, PageParams, User,
    },
    services::{activity, content, feed, users},
};

#[derive(Debug, Deserialize)]
pub struct AddCommentInput {
    pub text: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentFilters {
    /// Lists replies to this comment instead of top-level comments
    pub parent_id: Option<String>,
}

fn validate_text(text: &str) -> AppResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::invalid("Comment text is required"));
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::invalid(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_LEN
        )));
    }
    Ok(text.to_string())
}

/// The content owner's comment audience applies on top of the post's own switch
async fn ensure_can_comment(db: &Db, content: &Content, user: &User) -> AppResult<()> {
    if !content.allow_comments || content.status != ContentStatus::Active {
        return Err(AppError::forbidden(
            "COMMENTS_DISABLED",
            "Comments are disabled for this content",
        ));
    }
    if content.user_id == user.id || user.role.is_admin() {
        return Ok(());
    }

    let owner = db.require::<User>(&content.user_id).await?;
    match owner.privacy.allow_comments {
        Audience::Everyone => Ok(()),
        Audience::Followers if users::is_following(db, &user.id, &owner.id).await? => Ok(()),
        Audience::Followers => Err(AppError::forbidden(
            "COMMENTS_RESTRICTED",
            "Only followers can comment on this content",
        )),
        Audience::None => Err(AppError::forbidden(
            "COMMENTS_RESTRICTED",
            "The creator does not accept comments",
        )),
    }
}

pub async fn add(db: &Db, content_id: &str, user: &User, input: AddCommentInput) -> AppResult<Comment> {
    let text = validate_text(&input.text)?;
    let target = content::require_visible(db, content_id, Some(user)).await?;
    ensure_can_comment(db, &target, user).await?;

    let now = Utc::now();
    let comment = Comment {
        id: new_id(),
        content_id: content_id.to_string(),
        user_id: user.id.clone(),
        parent_id: input.parent_id.clone(),
        text,
        status: CommentStatus::Approved,
        likes: 0,
        reply_count: 0,
        is_deleted: false,
        created_at: now,
        updated_at: now,
    };

    with_retry("add_comment", || async {
        let mut post = db.require::<Content>(content_id).await?;
        let mut batch = db.batch();

        if let Some(parent_id) = &comment.parent_id {
            let mut parent = db.require::<Comment>(parent_id).await?;
            if parent.content_id != content_id || parent.is_deleted {
                return Err(AppError::invalid("Parent comment does not belong to this content"));
            }
            parent.reply_count += 1;
            batch.update(&parent)?;
        }

        post.stats.comments += 1;
        feed::refresh_feed_score(&mut post, now);
        batch.insert(&comment)?;
        batch.update(&post)?;
        batch.insert(&activity::content_activity(&user.id, ActivityKind::Comment, &post))?;
        batch.commit().await
    })
    .await?;

    tracing::info!(comment_id = %comment.id, content_id, user_id = %user.id, "Comment added");
    Ok(comment)
}

/// Approved comments; top-level newest first, replies oldest first
pub async fn list(
    db: &Db,
    content_id: &str,
    viewer: Option<&User>,
    filters: &CommentFilters,
    params: &PageParams,
) -> AppResult<Page<Comment>> {
    content::require_visible(db, content_id, viewer).await?;

    let direction = if filters.parent_id.is_some() {
        Direction::Asc
    } else {
        Direction::Desc
    };
    let items = db
        .find::<Comment>(
            &Query::new()
                .eq("content_id", content_id)
                .eq("parent_id", &filters.parent_id)
                .eq("status", CommentStatus::Approved)
                .eq("is_deleted", false)
                .order_by("created_at", direction)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Page::from_overfetch(items, params))
}

/// Soft delete by the author, the content owner or an admin
pub async fn delete(db: &Db, comment_id: &str, user: &User) -> AppResult<()> {
    with_retry("delete_comment", || async {
        let mut comment = db.require::<Comment>(comment_id).await?;
        if comment.is_deleted {
            return Err(AppError::not_found("Comment not found"));
        }
        let mut post = db.require::<Content>(&comment.content_id).await?;
        let allowed = comment.user_id == user.id || post.user_id == user.id || user.role.is_admin();
        if !allowed {
            return Err(AppError::forbidden(
                "NOT_OWNER",
                "You cannot delete this comment",
            ));
        }

        comment.is_deleted = true;
        comment.updated_at = Utc::now();
        post.stats.comments = post.stats.comments.saturating_sub(1);

        let mut batch = db.batch();
        batch.update(&comment)?;
        batch.update(&post)?;
        if let Some(parent_id) = &comment.parent_id {
            if let Some(mut parent) = db.get_versioned::<Comment>(parent_id).await? {
                parent.reply_count = parent.reply_count.saturating_sub(1);
                batch.update(&parent)?;
            }
        }
        batch.commit().await
    })
    .await?;

    tracing::info!(comment_id, deleted_by = %user.id, "Comment deleted");
    Ok(())
}

/// Moderator status change; hiding or rejecting an approved comment uncounts it
pub async fn set_status(db: &Db, comment_id: &str, status: CommentStatus) -> AppResult<Comment> {
    let comment = with_retry("set_comment_status", || async {
        let mut comment = db.require::<Comment>(comment_id).await?;
        let was_visible = comment.status == CommentStatus::Approved && !comment.is_deleted;
        let now_visible = status == CommentStatus::Approved && !comment.is_deleted;
        comment.status = status;
        comment.updated_at = Utc::now();

        let mut batch = db.batch();
        batch.update(&comment)?;
        if was_visible != now_visible {
            if let Some(mut post) = db.get_versioned::<Content>(&comment.content_id).await? {
                post.stats.comments = if now_visible {
                    post.stats.comments + 1
                } else {
                    post.stats.comments.saturating_sub(1)
                };
                batch.update(&post)?;
            }
        }
        batch.commit().await?;
        Ok(comment.into_inner())
    })
    .await?;

    tracing::info!(comment_id, status = ?status, "Comment status set");
    Ok(comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Cache;
    use crate::services::content::tests::video_input;
    use crate::services::users::tests::seed_user;

    fn input(text: &str) -> AddCommentInput {
        AddCommentInput {
            text: text.to_string(),
            parent_id: None,
        }
    }

    async fn post(db: &Db, owner: &str) -> Content {
        content::create(db, &Cache::disabled(), owner, video_input("post"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_reply_update_counts() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let target = post(&db, "alice").await;

        let top = add(&db, &target.id, &bob, input("  nice  ")).await.unwrap();
        assert_eq!(top.text, "nice");
        let reply = AddCommentInput {
            text: "thanks".to_string(),
            parent_id: Some(top.id.clone()),
        };
        add(&db, &target.id, &bob, reply).await.unwrap();

        assert_eq!(db.require::<Content>(&target.id).await.unwrap().stats.comments, 2);
        assert_eq!(db.require::<Comment>(&top.id).await.unwrap().reply_count, 1);

        let top_level = list(&db, &target.id, None, &CommentFilters::default(), &PageParams::default())
            .await
            .unwrap();
        assert_eq!(top_level.items.len(), 1);
        let replies = CommentFilters {
            parent_id: Some(top.id.clone()),
        };
        let replies = list(&db, &target.id, None, &replies, &PageParams::default())
            .await
            .unwrap();
        assert_eq!(replies.items[0].text, "thanks");
    }

    #[tokio::test]
    async fn test_validation_and_disabled_comments() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let target = post(&db, "alice").await;

        assert!(add(&db, &target.id, &bob, input("   ")).await.is_err());
        let long = "x".repeat(MAX_COMMENT_LEN + 1);
        assert!(add(&db, &target.id, &bob, input(&long)).await.is_err());

        let mut input_off = video_input("quiet");
        input_off.allow_comments = Some(false);
        let quiet = content::create(&db, &Cache::disabled(), "alice", input_off)
            .await
            .unwrap();
        let err = add(&db, &quiet.id, &bob, input("hi")).await.unwrap_err();
        assert_eq!(err.code(), "COMMENTS_DISABLED");
    }

    #[tokio::test]
    async fn test_followers_only_comments() {
        let db = Db::memory();
        let mut alice = seed_user(&db, "alice").await;
        alice.privacy.allow_comments = Audience::Followers;
        db.save(&alice).await.unwrap();
        let bob = seed_user(&db, "bob").await;
        let target = post(&db, "alice").await;

        let err = add(&db, &target.id, &bob, input("hi")).await.unwrap_err();
        assert_eq!(err.code(), "COMMENTS_RESTRICTED");

        users::follow(&db, &Cache::disabled(), "bob", "alice").await.unwrap();
        assert!(add(&db, &target.id, &bob, input("hi")).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_permissions_and_counts() {
        let db = Db::memory();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let carol = seed_user(&db, "carol").await;
        let target = post(&db, "alice").await;
        let comment = add(&db, &target.id, &bob, input("hi")).await.unwrap();

        assert!(matches!(
            delete(&db, &comment.id, &carol).await,
            Err(AppError::Forbidden { .. })
        ));
        delete(&db, &comment.id, &alice).await.unwrap();
        assert_eq!(db.require::<Content>(&target.id).await.unwrap().stats.comments, 0);
        assert!(delete(&db, &comment.id, &bob).await.is_err());
    }

    #[tokio::test]
    async fn test_hidden_comments_leave_listing() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let target = post(&db, "alice").await;
        let comment = add(&db, &target.id, &bob, input("spam")).await.unwrap();

        set_status(&db, &comment.id, CommentStatus::Hidden).await.unwrap();
        let page = list(&db, &target.id, None, &CommentFilters::default(), &PageParams::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(db.require::<Content>(&target.id).await.unwrap().stats.comments, 0);
    }
}
