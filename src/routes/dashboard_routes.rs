// src/routes/dashboard_routes.rs

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    appointments::AppointmentRow,
    error::ApiError,
    messaging::{inbox_view, ConversationView},
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    routes::{
        appointment_routes::{owner_column, upcoming_for},
        conversation_routes::conversations_of,
    },
};

const RECENT_CONVERSATIONS: usize = 3;

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum Dashboard {
    Patient {
        upcoming_count: i64,
        pending_count: i64,
        record_count: i64,
        next_appointment: Option<AppointmentRow>,
        recent_conversations: Vec<ConversationView>,
    },
    Doctor {
        today_confirmed_count: i64,
        pending_count: i64,
        patient_count: i64,
        next_appointment: Option<AppointmentRow>,
        recent_conversations: Vec<ConversationView>,
    },
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentCounts {
    upcoming: i64,
    pending: i64,
    today_confirmed: i64,
    patients: i64,
}

async fn appointment_counts(
    state: &AppState,
    role: Role,
    user_id: Uuid,
) -> Result<AppointmentCounts, ApiError> {
    let col = owner_column(role);
    sqlx::query_as::<_, AppointmentCounts>(&format!(
        r#"
        SELECT
          COUNT(*) FILTER (WHERE status IN (0, 1) AND appt_date >= $2) AS upcoming,
          COUNT(*) FILTER (WHERE status = 0) AS pending,
          COUNT(*) FILTER (WHERE status = 1 AND appt_date = $2) AS today_confirmed,
          COUNT(DISTINCT patient_id) FILTER (WHERE status <> 3) AS patients
        FROM appointment
        WHERE {col} = $1
        "#
    ))
    .bind(user_id)
    .bind(Utc::now().date_naive())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Dashboard>>, ApiError> {
    let counts = appointment_counts(&state, auth.role, auth.user_id).await?;
    let next_appointment = upcoming_for(&state, auth.role, auth.user_id, Some(1))
        .await?
        .into_iter()
        .next();

    let mut recent_conversations = inbox_view(
        conversations_of(&state, auth.user_id).await?,
        auth.role,
        None,
    );
    recent_conversations.truncate(RECENT_CONVERSATIONS);

    let data = match auth.role {
        Role::Patient => {
            let record_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM medical_record WHERE patient_id = $1",
            )
            .bind(auth.user_id)
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?;

            Dashboard::Patient {
                upcoming_count: counts.upcoming,
                pending_count: counts.pending,
                record_count,
                next_appointment,
                recent_conversations,
            }
        }
        Role::Doctor => Dashboard::Doctor {
            today_confirmed_count: counts.today_confirmed,
            pending_count: counts.pending,
            patient_count: counts.patients,
            next_appointment,
            recent_conversations,
        },
    };

    Ok(Json(ApiOk::new(data)))
}
