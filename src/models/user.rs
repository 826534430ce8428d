use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Seller,
    Admin,
    Superadmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::Superadmin)
    }

    pub fn is_seller(self) -> bool {
        matches!(self, Role::Seller | Role::Admin | Role::Superadmin)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Banned,
    Suspended,
    Inactive,
}

/// Who may interact with a user (messages, comments)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    Everyone,
    Followers,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Privacy {
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub allow_messages: Audience,
    #[serde(default)]
    pub allow_comments: Audience,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub followers: u64,
    pub following: u64,
    pub posts: u64,
    pub likes_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Always stored lowercased
    pub email: String,
    pub username: String,
    /// Lowercased username, used for uniqueness and lookups
    pub username_lower: String,
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    pub avatar: Option<String>,
    pub website: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub status_reason: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub stats: UserStats,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub strike_count: u32,
    /// Bumped on logout, password change and bans; refresh tokens carry it
    #[serde(default)]
    pub token_version: u64,
    pub password_hash: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for User {
    const COLLECTION: &'static str = "users";
    const NAME: &'static str = "User";

    fn id(&self) -> &str {
        &self.id
    }
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// View of the user safe to show to anyone
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: None,
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            bio: self.bio.clone(),
            avatar: self.avatar.clone(),
            website: self.website.clone(),
            role: self.role,
            status: self.status,
            is_verified: self.is_verified,
            stats: self.stats.clone(),
            privacy: None,
            created_at: self.created_at,
        }
    }

    /// View of the user for the account owner and admins
    pub fn private_profile(&self) -> UserProfile {
        UserProfile {
            email: Some(self.email.clone()),
            privacy: Some(self.privacy.clone()),
            ..self.profile()
        }
    }
}

/// Serialized user without credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub website: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub is_verified: bool,
    pub stats: UserStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
    pub created_at: DateTime<Utc>,
}

/// Follow edge, id `"{follower_id}_{following_id}"`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub id: String,
    pub follower_id: String,
    pub following_id: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Follow {
    const COLLECTION: &'static str = "follows";
    const NAME: &'static str = "Follow";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Follow {
    pub fn doc_id(follower_id: &str, following_id: &str) -> String {
        format!("{}_{}", follower_id, following_id)
    }
}

/// Uniqueness claim on an email or username, id `"email:{..}"` / `"username:{..}"`.
/// Inserted in the same commit as the user so two registrations cannot both win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserKey {
    pub id: String,
    pub user_id: String,
}

impl Document for UserKey {
    const COLLECTION: &'static str = "user_keys";
    const NAME: &'static str = "User key";

    fn id(&self) -> &str {
        &self.id
    }
}

impl UserKey {
    pub fn email(email: &str, user_id: &str) -> Self {
        Self {
            id: format!("email:{}", email),
            user_id: user_id.to_string(),
        }
    }

    pub fn username(username_lower: &str, user_id: &str) -> Self {
        Self {
            id: format!("username:{}", username_lower),
            user_id: user_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(!Role::User.is_seller());
        assert!(Role::Seller.is_seller());
        assert!(!Role::Seller.is_admin());
        assert!(Role::Superadmin.is_admin());
        assert!(Role::Admin.is_seller());
    }

    #[test]
    fn test_audience_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Audience::None).unwrap(), "\"none\"");
        let privacy: Privacy = serde_json::from_str("{}").unwrap();
        assert_eq!(privacy.allow_messages, Audience::Everyone);
    }

    #[test]
    fn test_follow_doc_id() {
        assert_eq!(Follow::doc_id("a", "b"), "a_b");
    }
}
