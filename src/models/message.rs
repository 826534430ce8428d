use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::Document;

pub const MAX_MESSAGE_LEN: usize = 5000;
pub const MAX_GROUP_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Sticker,
    Gif,
    Location,
    ContentShare,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePreview {
    pub message_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub created_by: String,
    pub participants: Vec<Participant>,
    /// Ids of participants who have not left; queried with `array-contains`
    pub member_ids: Vec<String>,
    pub last_message: Option<MessagePreview>,
    /// Unread message count per participant id
    #[serde(default)]
    pub unread: HashMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Conversation {
    const COLLECTION: &'static str = "conversations";
    const NAME: &'static str = "Conversation";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Conversation {
    /// Deterministic id of the direct conversation between two users
    pub fn direct_id(a: &str, b: &str) -> String {
        if a <= b {
            format!("dm_{}_{}", a, b)
        } else {
            format!("dm_{}_{}", b, a)
        }
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn unread_for(&self, user_id: &str) -> u64 {
        self.unread.get(user_id).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub body: String,
    pub media_url: Option<String>,
    pub reply_to: Option<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Document for Message {
    const COLLECTION: &'static str = "messages";
    const NAME: &'static str = "Message";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Message {
    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            message_id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            kind: self.kind,
            body: self.body.chars().take(100).collect(),
            sent_at: self.created_at,
        }
    }
}
