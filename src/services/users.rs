use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    db::{with_retry, Cache, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        ActivityKind, Audience, Follow, NotificationKind, Page, PageParams, Role, User, UserProfile,
        UserStatus,
    },
    services::{activity, feed, notifications},
};

pub const MAX_BIO_LEN: usize = 500;
pub const MAX_SEARCH_RESULTS: usize = 50;

#[derive(Debug, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: UserProfile,
    /// Whether the viewer follows this user; absent for anonymous viewers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrivacyPatch {
    pub is_private: Option<bool>,
    pub allow_messages: Option<Audience>,
    pub allow_comments: Option<Audience>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub website: Option<String>,
    pub privacy: Option<PrivacyPatch>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilters {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FollowResult {
    pub following: bool,
    pub followers: u64,
}

async fn view(db: &Db, user: User, viewer_id: Option<&str>) -> AppResult<ProfileView> {
    let is_own = viewer_id == Some(user.id.as_str());
    let is_following = match viewer_id {
        Some(viewer) if !is_own => Some(is_following(db, viewer, &user.id).await?),
        _ => None,
    };
    Ok(ProfileView {
        user: if is_own {
            user.private_profile()
        } else {
            user.profile()
        },
        is_following,
    })
}

pub async fn get_profile(db: &Db, user_id: &str, viewer_id: Option<&str>) -> AppResult<ProfileView> {
    let user = db.require::<User>(user_id).await?.into_inner();
    view(db, user, viewer_id).await
}

pub async fn get_by_username(
    db: &Db,
    username: &str,
    viewer_id: Option<&str>,
) -> AppResult<ProfileView> {
    let user = db
        .find_one::<User>(Query::new().eq("username_lower", username.to_lowercase()))
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    view(db, user, viewer_id).await
}

pub async fn update_profile(db: &Db, user_id: &str, patch: ProfilePatch) -> AppResult<UserProfile> {
    if let Some(bio) = &patch.bio {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(AppError::invalid(format!(
                "Bio must be at most {} characters",
                MAX_BIO_LEN
            )));
        }
    }
    if let Some(name) = &patch.full_name {
        if name.trim().is_empty() {
            return Err(AppError::invalid("Full name cannot be empty"));
        }
    }

    let user = with_retry("update_profile", || async {
        let mut user = db.require::<User>(user_id).await?;
        if let Some(name) = &patch.full_name {
            user.full_name = name.trim().to_string();
        }
        if let Some(bio) = &patch.bio {
            user.bio = bio.clone();
        }
        if let Some(avatar) = &patch.avatar {
            user.avatar = Some(avatar.clone()).filter(|a| !a.is_empty());
        }
        if let Some(website) = &patch.website {
            user.website = Some(website.clone()).filter(|w| !w.is_empty());
        }
        if let Some(privacy) = &patch.privacy {
            if let Some(is_private) = privacy.is_private {
                user.privacy.is_private = is_private;
            }
            if let Some(audience) = privacy.allow_messages {
                user.privacy.allow_messages = audience;
            }
            if let Some(audience) = privacy.allow_comments {
                user.privacy.allow_comments = audience;
            }
        }
        user.updated_at = Utc::now();
        db.update(&user).await?;
        Ok(user.into_inner())
    })
    .await?;

    tracing::info!(user_id, "Profile updated");
    Ok(user.private_profile())
}

pub async fn is_following(db: &Db, follower_id: &str, target_id: &str) -> AppResult<bool> {
    Ok(db
        .get::<Follow>(&Follow::doc_id(follower_id, target_id))
        .await?
        .is_some())
}

/// Ids of every account the user follows
pub async fn following_ids(db: &Db, user_id: &str) -> AppResult<Vec<String>> {
    Ok(db
        .find::<Follow>(&Query::new().eq("follower_id", user_id))
        .await?
        .into_iter()
        .map(|f| f.following_id)
        .collect())
}

/// Follows `target_id`; following twice is a no-op
pub async fn follow(
    db: &Db,
    cache: &Cache,
    follower_id: &str,
    target_id: &str,
) -> AppResult<FollowResult> {
    if follower_id == target_id {
        return Err(AppError::invalid("You cannot follow yourself"));
    }

    let result = with_retry("follow", || async {
        let mut target = db.require::<User>(target_id).await?;
        if !target.is_active() {
            return Err(AppError::not_found("User not found"));
        }

        let follow_id = Follow::doc_id(follower_id, target_id);
        if db.get::<Follow>(&follow_id).await?.is_some() {
            return Ok(FollowResult {
                following: true,
                followers: target.stats.followers,
            });
        }

        let mut follower = db.require::<User>(follower_id).await?;
        follower.stats.following += 1;
        target.stats.followers += 1;

        let mut batch = db.batch();
        batch.insert(&Follow {
            id: follow_id,
            follower_id: follower_id.to_string(),
            following_id: target_id.to_string(),
            created_at: Utc::now(),
        })?;
        batch.update(&follower)?;
        batch.update(&target)?;
        batch.insert(&activity::new_activity(
            follower_id,
            ActivityKind::Follow,
            target_id,
        ))?;
        batch.insert(&notifications::from_actor(
            target_id,
            NotificationKind::Follow,
            follower_id,
            follower_id,
            format!("{} started following you", follower.username),
        ))?;
        batch.commit().await?;

        Ok(FollowResult {
            following: true,
            followers: target.stats.followers,
        })
    })
    .await?;

    feed::invalidate(cache, follower_id).await;
    tracing::info!(follower_id, target_id, "User followed");
    Ok(result)
}

/// Removes a follow edge; unfollowing someone not followed is a no-op
pub async fn unfollow(
    db: &Db,
    cache: &Cache,
    follower_id: &str,
    target_id: &str,
) -> AppResult<FollowResult> {
    let result = with_retry("unfollow", || async {
        let mut target = db.require::<User>(target_id).await?;
        let Some(edge) = db
            .get_versioned::<Follow>(&Follow::doc_id(follower_id, target_id))
            .await?
        else {
            return Ok(FollowResult {
                following: false,
                followers: target.stats.followers,
            });
        };

        let mut batch = db.batch();
        if let Some(mut follower) = db.get_versioned::<User>(follower_id).await? {
            follower.stats.following = follower.stats.following.saturating_sub(1);
            batch.update(&follower)?;
        }
        target.stats.followers = target.stats.followers.saturating_sub(1);
        batch.update(&target)?;
        batch.delete_versioned(&edge);
        batch.commit().await?;

        Ok(FollowResult {
            following: false,
            followers: target.stats.followers,
        })
    })
    .await?;

    feed::invalidate(cache, follower_id).await;
    tracing::info!(follower_id, target_id, "User unfollowed");
    Ok(result)
}

async fn load_profiles(db: &Db, ids: Vec<String>) -> AppResult<Vec<UserProfile>> {
    let mut profiles = Vec::new();
    for id in ids {
        if let Some(user) = db.get::<User>(&id).await? {
            profiles.push(user.profile());
        }
    }
    Ok(profiles)
}

pub async fn followers(db: &Db, user_id: &str, params: &PageParams) -> AppResult<Page<UserProfile>> {
    db.require::<User>(user_id).await?;
    let edges = db
        .find::<Follow>(
            &Query::new()
                .eq("following_id", user_id)
                .order_by("created_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    let page = Page::from_overfetch(edges, params);
    let ids: Vec<String> = page.items.iter().map(|f| f.follower_id.clone()).collect();
    let items = load_profiles(db, ids).await?;
    Ok(page.with_items(items))
}

pub async fn following(db: &Db, user_id: &str, params: &PageParams) -> AppResult<Page<UserProfile>> {
    db.require::<User>(user_id).await?;
    let edges = db
        .find::<Follow>(
            &Query::new()
                .eq("follower_id", user_id)
                .order_by("created_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    let page = Page::from_overfetch(edges, params);
    let ids: Vec<String> = page.items.iter().map(|f| f.following_id.clone()).collect();
    let items = load_profiles(db, ids).await?;
    Ok(page.with_items(items))
}

/// Case-insensitive match on username and full name; prefix matches first
pub async fn search(db: &Db, q: &str, limit: usize) -> AppResult<Vec<UserProfile>> {
    let needle = q.trim().to_lowercase();
    if needle.is_empty() {
        return Err(AppError::invalid("Search query is required"));
    }

    let users = db
        .find::<User>(&Query::new().eq("status", UserStatus::Active))
        .await?;

    let mut matches: Vec<(u8, User)> = users
        .into_iter()
        .filter_map(|user| {
            let name = user.full_name.to_lowercase();
            let rank = if user.username_lower.starts_with(&needle) {
                0
            } else if name.starts_with(&needle) {
                1
            } else if user.username_lower.contains(&needle) || name.contains(&needle) {
                2
            } else {
                return None;
            };
            Some((rank, user))
        })
        .collect();

    matches.sort_by(|(ra, a), (rb, b)| {
        ra.cmp(rb)
            .then(b.stats.followers.cmp(&a.stats.followers))
            .then(a.username_lower.cmp(&b.username_lower))
    });

    Ok(matches
        .into_iter()
        .take(limit.clamp(1, MAX_SEARCH_RESULTS))
        .map(|(_, user)| user.profile())
        .collect())
}

/// Admin listing with optional role/status/text filters, newest first
pub async fn list_users(
    db: &Db,
    filters: &UserFilters,
    params: &PageParams,
) -> AppResult<Page<UserProfile>> {
    let mut query = Query::new().order_by("created_at", Direction::Desc);
    if let Some(role) = filters.role {
        query = query.eq("role", role);
    }
    if let Some(status) = filters.status {
        query = query.eq("status", status);
    }

    let needle = filters.q.as_deref().map(|q| q.trim().to_lowercase());
    let users: Vec<User> = db
        .find::<User>(&query)
        .await?
        .into_iter()
        .filter(|u| match &needle {
            Some(n) if !n.is_empty() => {
                u.username_lower.contains(n)
                    || u.email.contains(n)
                    || u.full_name.to_lowercase().contains(n)
            }
            _ => true,
        })
        .skip(params.offset())
        .take(params.limit() + 1)
        .collect();

    Ok(Page::from_overfetch(users, params).map(|u| u.private_profile()))
}

fn ensure_can_manage(actor: &User, target: &User) -> AppResult<()> {
    if actor.id == target.id {
        return Err(AppError::forbidden(
            "FORBIDDEN",
            "You cannot change your own account this way",
        ));
    }
    if target.role == Role::Superadmin && actor.role != Role::Superadmin {
        return Err(AppError::forbidden(
            "FORBIDDEN",
            "Only a superadmin can modify a superadmin",
        ));
    }
    Ok(())
}

/// Bans and suspensions also revoke the user's refresh tokens
pub async fn set_status(
    db: &Db,
    actor: &User,
    user_id: &str,
    status: UserStatus,
    reason: Option<String>,
) -> AppResult<UserProfile> {
    let user = with_retry("set_user_status", || async {
        let mut user = db.require::<User>(user_id).await?;
        ensure_can_manage(actor, &user)?;
        user.status = status;
        user.status_reason = reason.clone();
        if matches!(status, UserStatus::Banned | UserStatus::Suspended) {
            user.token_version += 1;
        }
        user.updated_at = Utc::now();
        db.update(&user).await?;
        Ok(user.into_inner())
    })
    .await?;

    tracing::info!(
        admin_id = %actor.id,
        user_id,
        status = ?status,
        "User status changed"
    );
    Ok(user.private_profile())
}

pub async fn set_role(db: &Db, actor: &User, user_id: &str, role: Role) -> AppResult<UserProfile> {
    if role == Role::Superadmin && actor.role != Role::Superadmin {
        return Err(AppError::forbidden(
            "FORBIDDEN",
            "Only a superadmin can grant superadmin",
        ));
    }

    let user = with_retry("set_user_role", || async {
        let mut user = db.require::<User>(user_id).await?;
        ensure_can_manage(actor, &user)?;
        user.role = role;
        user.updated_at = Utc::now();
        db.update(&user).await?;
        Ok(user.into_inner())
    })
    .await?;

    tracing::info!(admin_id = %actor.id, user_id, role = ?role, "User role changed");
    Ok(user.private_profile())
}

pub async fn set_verified(db: &Db, user_id: &str, verified: bool) -> AppResult<UserProfile> {
    let user = with_retry("set_user_verified", || async {
        let mut user = db.require::<User>(user_id).await?;
        user.is_verified = verified;
        user.updated_at = Utc::now();
        db.update(&user).await?;
        Ok(user.into_inner())
    })
    .await?;
    Ok(user.private_profile())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Privacy, UserStats};

    pub(crate) fn user(id: &str) -> User {
        let now = Utc::now();
        User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            username: id.to_string(),
            username_lower: id.to_lowercase(),
            full_name: format!("{} Tester", id),
            bio: String::new(),
            avatar: None,
            website: None,
            role: Role::User,
            status: UserStatus::Active,
            status_reason: None,
            is_verified: false,
            stats: UserStats::default(),
            privacy: Privacy::default(),
            strike_count: 0,
            token_version: 0,
            password_hash: String::new(),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) async fn seed_user(db: &Db, id: &str) -> User {
        let user = user(id);
        db.insert(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_follow_is_idempotent_and_counted() {
        let db = Db::memory();
        let cache = Cache::disabled();
        seed_user(&db, "alice").await;
        seed_user(&db, "bob").await;

        follow(&db, &cache, "alice", "bob").await.unwrap();
        let again = follow(&db, &cache, "alice", "bob").await.unwrap();
        assert_eq!(again.followers, 1);

        let bob = db.require::<User>("bob").await.unwrap();
        let alice = db.require::<User>("alice").await.unwrap();
        assert_eq!(bob.stats.followers, 1);
        assert_eq!(alice.stats.following, 1);
        assert!(is_following(&db, "alice", "bob").await.unwrap());
        assert_eq!(following_ids(&db, "alice").await.unwrap(), vec!["bob".to_string()]);

        // only the first follow notifies
        assert_eq!(notifications::unread_count(&db, "bob").await.unwrap(), 1);

        let result = unfollow(&db, &cache, "alice", "bob").await.unwrap();
        assert!(!result.following);
        assert_eq!(result.followers, 0);
        assert!(!is_following(&db, "alice", "bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_cannot_follow_self() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        let err = follow(&db, &Cache::disabled(), "alice", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_followers_page() {
        let db = Db::memory();
        let cache = Cache::disabled();
        seed_user(&db, "star").await;
        for id in ["f1", "f2", "f3"] {
            seed_user(&db, id).await;
            follow(&db, &cache, id, "star").await.unwrap();
        }

        let page = followers(&db, "star", &PageParams::new(1, 2)).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);

        let page = following(&db, "f1", &PageParams::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "star");
    }

    #[tokio::test]
    async fn test_search_ranks_prefix_first() {
        let db = Db::memory();
        seed_user(&db, "annabel").await;
        seed_user(&db, "joanna").await;
        let mut banned = user("anna_banned");
        banned.status = UserStatus::Banned;
        db.insert(&banned).await.unwrap();

        let results = search(&db, "ANNA", 10).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["annabel", "joanna"]);
    }

    #[tokio::test]
    async fn test_update_profile_validates_bio() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        let patch = ProfilePatch {
            bio: Some("x".repeat(MAX_BIO_LEN + 1)),
            ..Default::default()
        };
        assert!(update_profile(&db, "alice", patch).await.is_err());

        let patch = ProfilePatch {
            bio: Some("hello".to_string()),
            privacy: Some(PrivacyPatch {
                allow_messages: Some(Audience::Followers),
                ..Default::default()
            }),
            ..Default::default()
        };
        let profile = update_profile(&db, "alice", patch).await.unwrap();
        assert_eq!(profile.bio, "hello");
        assert_eq!(profile.privacy.unwrap().allow_messages, Audience::Followers);
    }

    #[tokio::test]
    async fn test_ban_bumps_token_version_and_protects_superadmin() {
        let db = Db::memory();
        let mut admin = user("admin");
        admin.role = Role::Admin;
        db.insert(&admin).await.unwrap();
        seed_user(&db, "bob").await;
        let mut root = user("root");
        root.role = Role::Superadmin;
        db.insert(&root).await.unwrap();

        set_status(&db, &admin, "bob", UserStatus::Banned, Some("spam".to_string()))
            .await
            .unwrap();
        let bob = db.require::<User>("bob").await.unwrap();
        assert_eq!(bob.status, UserStatus::Banned);
        assert_eq!(bob.token_version, 1);

        let err = set_role(&db, &admin, "root", Role::User).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }
}
