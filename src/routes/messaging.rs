use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Router,
};

use crate::{
    api::{created, ok, ok_with_message, ApiResult, AppState, Body, Created, Params},
    middleware::AuthUser,
    models::{Conversation, Message, Page, PageParams},
    services::messaging::{
        self, ConversationSummary, CreateGroupInput, MessageQuery, SendMessageInput,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages/conversations", get(conversations))
        .route("/messages/direct/:user_id", post(send_direct))
        .route("/messages/groups", post(create_group))
        .route(
            "/messages/conversations/:id",
            get(messages).post(send_to_conversation),
        )
        .route("/messages/conversations/:id/read", post(mark_read))
        .route("/messages/conversations/:id/leave", post(leave))
        .route("/messages/:id", delete(delete_message))
}

async fn conversations(
    State(state): State<AppState>,
    user: AuthUser,
    Params(page): Params<PageParams>,
) -> ApiResult<Page<ConversationSummary>> {
    ok(messaging::list_conversations(&state.db, user.id(), &page).await?)
}

async fn send_direct(
    State(state): State<AppState>,
    user: AuthUser,
    Path(recipient): Path<String>,
    Body(input): Body<SendMessageInput>,
) -> Created<Message> {
    created(messaging::send_direct(&state.db, &user.0, &recipient, input).await?)
}

async fn create_group(
    State(state): State<AppState>,
    user: AuthUser,
    Body(input): Body<CreateGroupInput>,
) -> Created<Conversation> {
    created(messaging::create_group(&state.db, &user.0, input).await?)
}

async fn messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Params(query): Params<MessageQuery>,
) -> ApiResult<Vec<Message>> {
    ok(messaging::list_messages(&state.db, &id, user.id(), &query).await?)
}

async fn send_to_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Body(input): Body<SendMessageInput>,
) -> Created<Message> {
    created(messaging::send_to_conversation(&state.db, &user.0, &id, input).await?)
}

async fn mark_read(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    messaging::mark_read(&state.db, &id, user.id()).await?;
    ok(())
}

async fn leave(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    messaging::leave_group(&state.db, &id, user.id()).await?;
    ok_with_message((), "Left conversation")
}

async fn delete_message(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<()> {
    messaging::delete_message(&state.db, &id, user.id()).await?;
    ok_with_message((), "Message deleted")
}
