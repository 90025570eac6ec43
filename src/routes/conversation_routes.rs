// src/routes/conversation_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    live::{LiveEvent, Topic},
    messaging::{
        inbox_view, preview_of, validate_message_text, ConversationRow, ConversationView,
        MessageRow,
    },
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    routes::auth_routes::load_user,
};

const CONVERSATION_COLUMNS: &str = r#"
    conversation_id, patient_id, doctor_id, patient_name, doctor_name,
    last_message_text, updated_at
"#;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list_conversations).post(open_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/{conversation_id}/stream", get(stream_conversation))
        .route("/inbox/stream", get(stream_inbox))
}

pub(crate) async fn conversations_of(
    state: &AppState,
    user_id: Uuid,
) -> Result<Vec<ConversationRow>, ApiError> {
    sqlx::query_as::<_, ConversationRow>(&format!(
        r#"
        SELECT {CONVERSATION_COLUMNS}
        FROM conversation
        WHERE patient_id = $1 OR doctor_id = $1
        ORDER BY updated_at DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

async fn load_conversation(
    state: &AppState,
    auth: &AuthContext,
    conversation_id: Uuid,
) -> Result<ConversationRow, ApiError> {
    sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE conversation_id = $1"
    ))
    .bind(conversation_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .filter(|c| c.has_participant(auth.user_id))
    .ok_or_else(|| ApiError::not_found("conversation"))
}

fn to_sse(
    events: impl Stream<Item = LiveEvent> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static> {
    let stream = events.map(|ev| Event::default().event(ev.kind()).json_data(&ev));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/* ============================================================
   Conversations
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ConversationSearchQuery {
    pub search: Option<String>,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ConversationSearchQuery>,
) -> Result<Json<ApiOk<Vec<ConversationView>>>, ApiError> {
    let rows = conversations_of(&state, auth.user_id).await?;
    Ok(Json(ApiOk::new(inbox_view(rows, auth.role, q.search.as_deref()))))
}

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub counterpart_id: Uuid,
}

/// Returns the conversation for the (patient, doctor) pair, creating it on
/// first contact.
pub async fn open_conversation(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<OpenConversationRequest>,
) -> Result<Json<ApiOk<ConversationView>>, ApiError> {
    let counterpart = load_user(&state, req.counterpart_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::not_found("user"))?;

    if counterpart.roles != auth.role.counterpart() {
        return Err(ApiError::validation(format!(
            "a {} can only message a {}",
            auth.role,
            auth.role.counterpart()
        )));
    }

    let (patient_id, patient_name, doctor_id, doctor_name) = match auth.role {
        Role::Patient => (auth.user_id, auth.display_name.clone(), counterpart.user_id, counterpart.display_name),
        Role::Doctor => (counterpart.user_id, counterpart.display_name, auth.user_id, auth.display_name.clone()),
    };

    sqlx::query(
        r#"
        INSERT INTO conversation (patient_id, doctor_id, patient_name, doctor_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (patient_id, doctor_id) DO NOTHING
        "#,
    )
    .bind(patient_id)
    .bind(doctor_id)
    .bind(&patient_name)
    .bind(&doctor_name)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE patient_id = $1 AND doctor_id = $2"
    ))
    .bind(patient_id)
    .bind(doctor_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(ConversationView::for_viewer(row, auth.role))))
}

/* ============================================================
   Messages
   ============================================================ */

pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<MessageRow>>>, ApiError> {
    load_conversation(&state, &auth, conversation_id).await?;

    let rows: Vec<MessageRow> = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT message_id, conversation_id, sender_id, sender_role,
               message_text AS text, created_at
        FROM message
        WHERE conversation_id = $1
        ORDER BY created_at ASC, message_id ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ApiOk<MessageRow>>, ApiError> {
    let text = validate_message_text(&req.text)?;
    let conversation = load_conversation(&state, &auth, conversation_id).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let message: MessageRow = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO message (conversation_id, sender_id, sender_role, message_text)
        VALUES ($1, $2, $3, $4)
        RETURNING message_id, conversation_id, sender_id, sender_role,
                  message_text AS text, created_at
        "#,
    )
    .bind(conversation_id)
    .bind(auth.user_id)
    .bind(auth.role)
    .bind(&text)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let preview = preview_of(&text);
    sqlx::query(
        r#"
        UPDATE conversation
        SET last_message_text = $2, updated_at = $3
        WHERE conversation_id = $1
        "#,
    )
    .bind(conversation_id)
    .bind(&preview)
    .bind(message.created_at)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    let delivered = state.live.publish(
        Topic::Conversation(conversation_id),
        LiveEvent::Message { message: message.clone() },
    );
    for user_id in conversation.participants() {
        state.live.publish(
            Topic::Inbox(user_id),
            LiveEvent::Inbox {
                conversation_id,
                last_message_text: preview.clone(),
                updated_at: message.created_at,
            },
        );
    }

    tracing::debug!(%conversation_id, sender_id = %auth.user_id, delivered, "message sent");
    Ok(Json(ApiOk::new(message)))
}

/* ============================================================
   Live streams (SSE)
   ============================================================ */

pub async fn stream_conversation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(conversation_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static>, ApiError> {
    load_conversation(&state, &auth, conversation_id).await?;
    Ok(to_sse(state.live.stream(Topic::Conversation(conversation_id))))
}

pub async fn stream_inbox(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>> + Send + 'static> {
    to_sse(state.live.stream(Topic::Inbox(auth.user_id)))
}
