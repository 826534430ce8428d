//! Direct and group conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::{
    db::{with_retry, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        message::{MAX_GROUP_NAME_LEN, MAX_MESSAGE_LEN},
        new_id, Audience, Conversation, ConversationKind, Message, MessageKind, MessageStatus, Page,
        PageParams, Participant, ParticipantRole, User,
    },
    services::users,
};

pub const DEFAULT_MESSAGE_LIMIT: usize = 50;
pub const MAX_MESSAGE_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageInput {
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub body: String,
    pub media_url: Option<String>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupInput {
    pub name: String,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    /// Only messages sent strictly before this instant
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// A conversation as seen by one participant
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
}

fn validate_message(input: &SendMessageInput) -> AppResult<()> {
    if input.body.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::invalid(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    let has_media = input.media_url.as_deref().is_some_and(|u| !u.trim().is_empty());
    match input.kind {
        MessageKind::Text | MessageKind::ContentShare | MessageKind::Location
            if input.body.trim().is_empty() =>
        {
            Err(AppError::invalid("Message body is required"))
        }
        MessageKind::Image | MessageKind::Video | MessageKind::Audio | MessageKind::Gif | MessageKind::Sticker
            if !has_media =>
        {
            Err(AppError::invalid("A media URL is required for this message type"))
        }
        _ => Ok(()),
    }
}

fn build_message(conversation_id: &str, sender_id: &str, input: &SendMessageInput) -> Message {
    Message {
        id: new_id(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        kind: input.kind,
        body: input.body.trim().to_string(),
        media_url: input.media_url.clone(),
        reply_to: input.reply_to.clone(),
        status: MessageStatus::Sent,
        is_deleted: false,
        created_at: Utc::now(),
    }
}

fn participant(user_id: &str, role: ParticipantRole, now: DateTime<Utc>) -> Participant {
    Participant {
        user_id: user_id.to_string(),
        role,
        joined_at: now,
        left_at: None,
        last_read_at: None,
    }
}

/// Records the message on the conversation: preview, unread counts, activity time
fn apply_message(conversation: &mut Conversation, message: &Message) {
    conversation.last_message = Some(message.preview());
    conversation.updated_at = message.created_at;
    for member in &conversation.member_ids {
        if *member != message.sender_id {
            *conversation.unread.entry(member.clone()).or_insert(0) += 1;
        }
    }
}

async fn ensure_can_message(db: &Db, sender: &User, recipient: &User) -> AppResult<()> {
    if !recipient.is_active() {
        return Err(AppError::forbidden(
            "RECIPIENT_UNAVAILABLE",
            "This user cannot receive messages",
        ));
    }
    if sender.role.is_admin() {
        return Ok(());
    }
    match recipient.privacy.allow_messages {
        Audience::Everyone => Ok(()),
        Audience::Followers if users::is_following(db, &recipient.id, &sender.id).await? => Ok(()),
        Audience::Followers => Err(AppError::forbidden(
            "MESSAGES_RESTRICTED",
            "This user only accepts messages from people they follow",
        )),
        Audience::None => Err(AppError::forbidden(
            "MESSAGES_DISABLED",
            "This user does not accept messages",
        )),
    }
}

/// Sends a direct message, creating the conversation on first contact
pub async fn send_direct(
    db: &Db,
    sender: &User,
    recipient_id: &str,
    input: SendMessageInput,
) -> AppResult<Message> {
    if recipient_id == sender.id {
        return Err(AppError::invalid("You cannot message yourself"));
    }
    validate_message(&input)?;
    let recipient = db
        .get::<User>(recipient_id)
        .await?
        .ok_or(AppError::UserNotFound)?;
    ensure_can_message(db, sender, &recipient).await?;

    let conversation_id = Conversation::direct_id(&sender.id, recipient_id);
    let message = build_message(&conversation_id, &sender.id, &input);

    with_retry("send_direct", || async {
        let mut batch = db.batch();
        match db.get_versioned::<Conversation>(&conversation_id).await? {
            Some(mut conversation) => {
                apply_message(&mut conversation, &message);
                batch.update(&conversation)?;
            }
            None => {
                let now = message.created_at;
                let mut conversation = Conversation {
                    id: conversation_id.clone(),
                    kind: ConversationKind::Direct,
                    name: None,
                    created_by: sender.id.clone(),
                    participants: vec![
                        participant(&sender.id, ParticipantRole::Member, now),
                        participant(recipient_id, ParticipantRole::Member, now),
                    ],
                    member_ids: vec![sender.id.clone(), recipient_id.to_string()],
                    last_message: None,
                    unread: HashMap::new(),
                    created_at: now,
                    updated_at: now,
                };
                apply_message(&mut conversation, &message);
                batch.insert(&conversation)?;
            }
        }
        batch.insert(&message)?;
        batch.commit().await
    })
    .await?;

    tracing::info!(
        conversation_id = %conversation_id,
        sender_id = %sender.id,
        recipient_id,
        "Direct message sent"
    );
    Ok(message)
}

pub async fn create_group(db: &Db, creator: &User, input: CreateGroupInput) -> AppResult<Conversation> {
    let name = input.name.trim();
    if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(AppError::invalid(format!(
            "Group name must be 1-{} characters",
            MAX_GROUP_NAME_LEN
        )));
    }
    let members: BTreeSet<&str> = input
        .member_ids
        .iter()
        .map(String::as_str)
        .filter(|id| *id != creator.id)
        .collect();
    if members.len() < 2 {
        return Err(AppError::invalid("A group needs at least two other members"));
    }
    for member in &members {
        let user = db.get::<User>(member).await?.ok_or(AppError::UserNotFound)?;
        if !user.is_active() {
            return Err(AppError::invalid(format!("User {} cannot join groups", member)));
        }
    }

    let now = Utc::now();
    let mut participants = vec![participant(&creator.id, ParticipantRole::Admin, now)];
    participants.extend(members.iter().map(|id| participant(id, ParticipantRole::Member, now)));
    let conversation = Conversation {
        id: new_id(),
        kind: ConversationKind::Group,
        name: Some(name.to_string()),
        created_by: creator.id.clone(),
        member_ids: participants.iter().map(|p| p.user_id.clone()).collect(),
        participants,
        last_message: None,
        unread: HashMap::new(),
        created_at: now,
        updated_at: now,
    };
    db.insert(&conversation).await?;

    tracing::info!(
        conversation_id = %conversation.id,
        creator_id = %creator.id,
        members = conversation.member_ids.len(),
        "Group created"
    );
    Ok(conversation)
}

fn ensure_member(conversation: &Conversation, user_id: &str) -> AppResult<()> {
    if !conversation.is_member(user_id) {
        return Err(AppError::forbidden(
            "NOT_PARTICIPANT",
            "You are not a participant in this conversation",
        ));
    }
    Ok(())
}

pub async fn send_to_conversation(
    db: &Db,
    sender: &User,
    conversation_id: &str,
    input: SendMessageInput,
) -> AppResult<Message> {
    validate_message(&input)?;
    let conversation = db.require::<Conversation>(conversation_id).await?;
    ensure_member(&conversation, &sender.id)?;
    if conversation.kind == ConversationKind::Direct {
        let recipient_id = conversation
            .member_ids
            .iter()
            .find(|id| **id != sender.id)
            .ok_or(AppError::UserNotFound)?;
        let recipient = db
            .get::<User>(recipient_id)
            .await?
            .ok_or(AppError::UserNotFound)?;
        ensure_can_message(db, sender, &recipient).await?;
    }
    let message = build_message(conversation_id, &sender.id, &input);

    with_retry("send_message", || async {
        let mut conversation = db.require::<Conversation>(conversation_id).await?;
        ensure_member(&conversation, &sender.id)?;
        apply_message(&mut conversation, &message);

        let mut batch = db.batch();
        batch.insert(&message)?;
        batch.update(&conversation)?;
        batch.commit().await
    })
    .await?;

    tracing::debug!(conversation_id, sender_id = %sender.id, "Message sent");
    Ok(message)
}

/// Conversations the user belongs to, most recent activity first
pub async fn list_conversations(
    db: &Db,
    user_id: &str,
    params: &PageParams,
) -> AppResult<Page<ConversationSummary>> {
    let items = db
        .find::<Conversation>(
            &Query::new()
                .contains("member_ids", user_id)
                .order_by("updated_at", Direction::Desc)
                .offset(params.offset())
                .limit(params.limit() + 1),
        )
        .await?;
    Ok(Page::from_overfetch(items, params).map(|conversation| ConversationSummary {
        unread_count: conversation.unread_for(user_id),
        conversation,
    }))
}

/// Newest first; deleted messages keep their place with the body blanked
pub async fn list_messages(
    db: &Db,
    conversation_id: &str,
    user_id: &str,
    query: &MessageQuery,
) -> AppResult<Vec<Message>> {
    let conversation = db.require::<Conversation>(conversation_id).await?;
    ensure_member(&conversation, user_id)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);
    let mut filter = Query::new()
        .eq("conversation_id", conversation_id)
        .order_by("created_at", Direction::Desc)
        .limit(limit);
    if let Some(before) = query.before {
        filter = filter.lt("created_at", before);
    }

    let mut messages = db.find::<Message>(&filter).await?;
    for message in messages.iter_mut().filter(|m| m.is_deleted) {
        message.body.clear();
        message.media_url = None;
    }
    Ok(messages)
}

pub async fn mark_read(db: &Db, conversation_id: &str, user_id: &str) -> AppResult<()> {
    with_retry("mark_read", || async {
        let mut conversation = db.require::<Conversation>(conversation_id).await?;
        ensure_member(&conversation, user_id)?;
        conversation.unread.insert(user_id.to_string(), 0);
        if let Some(p) = conversation.participant_mut(user_id) {
            p.last_read_at = Some(Utc::now());
        }
        db.update(&conversation).await
    })
    .await
}

/// Sender-only soft delete
pub async fn delete_message(db: &Db, message_id: &str, user_id: &str) -> AppResult<()> {
    with_retry("delete_message", || async {
        let mut message = db.require::<Message>(message_id).await?;
        if message.sender_id != user_id {
            return Err(AppError::forbidden(
                "NOT_SENDER",
                "You can only delete your own messages",
            ));
        }
        if message.is_deleted {
            return Ok(());
        }
        message.is_deleted = true;

        let mut batch = db.batch();
        batch.update(&message)?;
        if let Some(mut conversation) = db
            .get_versioned::<Conversation>(&message.conversation_id)
            .await?
        {
            if let Some(preview) = conversation
                .last_message
                .as_mut()
                .filter(|p| p.message_id == message_id)
            {
                preview.body.clear();
                batch.update(&conversation)?;
            }
        }
        batch.commit().await
    })
    .await?;

    tracing::info!(message_id, user_id, "Message deleted");
    Ok(())
}

/// Leaves a group; the longest-standing member inherits admin if none remain
pub async fn leave_group(db: &Db, conversation_id: &str, user_id: &str) -> AppResult<()> {
    with_retry("leave_group", || async {
        let mut conversation = db.require::<Conversation>(conversation_id).await?;
        if conversation.kind != ConversationKind::Group {
            return Err(AppError::invalid("Only group conversations can be left"));
        }
        ensure_member(&conversation, user_id)?;

        let now = Utc::now();
        if let Some(p) = conversation.participant_mut(user_id) {
            p.left_at = Some(now);
        }
        conversation.member_ids.retain(|id| id != user_id);
        conversation.unread.remove(user_id);
        conversation.updated_at = now;

        let has_admin = conversation.participants.iter().any(|p| {
            p.left_at.is_none() && p.role == ParticipantRole::Admin
        });
        if !has_admin {
            if let Some(successor) = conversation.participants.iter_mut().find(|p| p.left_at.is_none()) {
                successor.role = ParticipantRole::Admin;
            }
        }
        db.update(&conversation).await
    })
    .await?;

    tracing::info!(conversation_id, user_id, "Left group");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Cache;
    use crate::models::UserStatus;
    use crate::services::users::tests::seed_user;

    fn text(body: &str) -> SendMessageInput {
        SendMessageInput {
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_direct_conversation_is_reused() {
        let db = Db::memory();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;

        send_direct(&db, &alice, "bob", text("hi")).await.unwrap();
        send_direct(&db, &bob, "alice", text("hey")).await.unwrap();
        send_direct(&db, &alice, "bob", text("how are you")).await.unwrap();

        let conversations = list_conversations(&db, "bob", &PageParams::default()).await.unwrap();
        assert_eq!(conversations.items.len(), 1);
        let summary = &conversations.items[0];
        assert_eq!(summary.conversation.id, "dm_alice_bob");
        assert_eq!(summary.unread_count, 2);

        mark_read(&db, "dm_alice_bob", "bob").await.unwrap();
        let conversation = db.require::<Conversation>("dm_alice_bob").await.unwrap();
        assert_eq!(conversation.unread_for("bob"), 0);
        assert_eq!(conversation.unread_for("alice"), 1);
    }

    #[tokio::test]
    async fn test_direct_message_rules() {
        let db = Db::memory();
        let alice = seed_user(&db, "alice").await;
        let mut bob = seed_user(&db, "bob").await;

        assert!(send_direct(&db, &alice, "alice", text("me")).await.is_err());
        assert!(matches!(
            send_direct(&db, &alice, "ghost", text("boo")).await,
            Err(AppError::UserNotFound)
        ));
        assert!(send_direct(&db, &alice, "bob", text("   ")).await.is_err());

        bob.privacy.allow_messages = Audience::Followers;
        db.save(&bob).await.unwrap();
        let err = send_direct(&db, &alice, "bob", text("hi")).await.unwrap_err();
        assert_eq!(err.code(), "MESSAGES_RESTRICTED");

        users::follow(&db, &Cache::disabled(), "bob", "alice").await.unwrap();
        assert!(send_direct(&db, &alice, "bob", text("hi")).await.is_ok());

        bob.privacy.allow_messages = Audience::None;
        db.save(&bob).await.unwrap();
        let err = send_direct(&db, &alice, "bob", text("hi")).await.unwrap_err();
        assert_eq!(err.code(), "MESSAGES_DISABLED");
    }

    #[tokio::test]
    async fn test_existing_direct_conversation_respects_recipient_settings() {
        let db = Db::memory();
        let alice = seed_user(&db, "alice").await;
        let mut bob = seed_user(&db, "bob").await;
        send_direct(&db, &alice, "bob", text("hi")).await.unwrap();

        bob.privacy.allow_messages = Audience::None;
        db.save(&bob).await.unwrap();
        let err = send_to_conversation(&db, &alice, "dm_alice_bob", text("still there?"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MESSAGES_DISABLED");

        bob.privacy.allow_messages = Audience::Everyone;
        bob.status = UserStatus::Banned;
        db.save(&bob).await.unwrap();
        let err = send_to_conversation(&db, &alice, "dm_alice_bob", text("hello?"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RECIPIENT_UNAVAILABLE");

        // nothing was recorded past the first message
        let conversation = db.require::<Conversation>("dm_alice_bob").await.unwrap();
        assert_eq!(conversation.unread_for("bob"), 1);
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let db = Db::memory();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        seed_user(&db, "carol").await;
        let dave = seed_user(&db, "dave").await;

        let too_small = CreateGroupInput {
            name: "Pair".to_string(),
            member_ids: vec!["bob".to_string(), "alice".to_string()],
        };
        assert!(create_group(&db, &alice, too_small).await.is_err());

        let group = create_group(
            &db,
            &alice,
            CreateGroupInput {
                name: " Crew ".to_string(),
                member_ids: vec!["bob".to_string(), "carol".to_string()],
            },
        )
        .await
        .unwrap();
        assert_eq!(group.name.as_deref(), Some("Crew"));
        assert_eq!(group.member_ids.len(), 3);

        send_to_conversation(&db, &bob, &group.id, text("yo")).await.unwrap();
        let err = send_to_conversation(&db, &dave, &group.id, text("let me in"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_PARTICIPANT");

        leave_group(&db, &group.id, "alice").await.unwrap();
        let group = db.require::<Conversation>(&group.id).await.unwrap();
        assert!(!group.is_member("alice"));
        let admins: Vec<_> = group
            .participants
            .iter()
            .filter(|p| p.left_at.is_none() && p.role == ParticipantRole::Admin)
            .collect();
        assert_eq!(admins.len(), 1);
        assert!(send_to_conversation(&db, &alice, &group.id, text("back?")).await.is_err());
    }

    #[tokio::test]
    async fn test_deleted_messages_are_blanked() {
        let db = Db::memory();
        let alice = seed_user(&db, "alice").await;
        seed_user(&db, "bob").await;
        let message = send_direct(&db, &alice, "bob", text("oops")).await.unwrap();

        assert!(delete_message(&db, &message.id, "bob").await.is_err());
        delete_message(&db, &message.id, "alice").await.unwrap();

        let messages = list_messages(&db, "dm_alice_bob", "bob", &MessageQuery::default())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_deleted);
        assert!(messages[0].body.is_empty());

        assert!(list_messages(&db, "dm_alice_bob", "mallory", &MessageQuery::default())
            .await
            .is_err());
    }
}
