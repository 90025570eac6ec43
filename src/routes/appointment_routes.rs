// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    appointments::{
        ensure_not_past, next_status, parse_date, parse_time, Action, AppointmentRow,
        AppointmentStatus, APPOINTMENT_COLUMNS,
    },
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role},
    routes::auth_routes::load_user,
};

const MAX_REASON_CHARS: usize = 1000;
const MAX_NOTES_CHARS: usize = 4000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(book_appointment).get(list_my_appointments))
        .route("/appointments/requests", get(list_requests))
        .route("/appointments/schedule", get(get_schedule))
        .route("/appointments/history", get(get_history))
        .route("/appointments/upcoming", get(get_upcoming))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).delete(delete_request),
        )
        .route("/appointments/{appointment_id}/approve", post(approve))
        .route("/appointments/{appointment_id}/reject", post(reject))
        .route("/appointments/{appointment_id}/cancel", post(cancel))
        .route("/appointments/{appointment_id}/complete", post(complete))
        .route("/appointments/{appointment_id}/reschedule", post(reschedule))
}

/// Column holding the caller's id on their own appointments.
pub(crate) fn owner_column(role: Role) -> &'static str {
    match role {
        Role::Patient => "patient_id",
        Role::Doctor => "doctor_id",
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn optional_text(raw: Option<String>, field: &str, max: usize) -> Result<Option<String>, ApiError> {
    let Some(text) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > max {
        return Err(ApiError::validation(format!("{field} must be at most {max} characters")));
    }
    Ok(Some(text))
}

async fn fetch_appointments(
    state: &AppState,
    where_order: &str,
    user_id: Uuid,
    extra: Option<&str>,
) -> Result<Vec<AppointmentRow>, ApiError> {
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointment {where_order}");
    let mut q = sqlx::query_as::<_, AppointmentRow>(&sql).bind(user_id);
    if let Some(extra) = extra {
        q = q.bind(extra);
    }
    q.fetch_all(&state.db).await.map_err(ApiError::db)
}

/// Loads an appointment the caller takes part in. Other people's
/// appointments look missing.
async fn load_own_appointment(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1"
    ))
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .filter(|a| a.is_participant(auth.user_id))
    .ok_or_else(|| ApiError::not_found("appointment"))
}

/* ============================================================
   POST /appointments (patient books)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub doctor_id: Uuid,
    pub date: String,
    pub time: String,
    pub reason: Option<String>,
}

pub async fn book_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    auth.require_patient()?;

    let date = parse_date(&req.date)?;
    let time = parse_time(&req.time)?;
    ensure_not_past(date, today())?;
    let reason = optional_text(req.reason, "reason", MAX_REASON_CHARS)?;

    let doctor = load_user(&state, req.doctor_id)
        .await?
        .filter(|u| u.is_active && u.roles == Role::Doctor)
        .ok_or_else(|| ApiError::not_found("doctor"))?;

    let row: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        INSERT INTO appointment
            (patient_id, patient_name, doctor_id, doctor_name, appt_date, appt_time, reason, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(auth.user_id)
    .bind(&auth.display_name)
    .bind(doctor.user_id)
    .bind(&doctor.display_name)
    .bind(date)
    .bind(time)
    .bind(reason)
    .bind(AppointmentStatus::Pending)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(
        appointment_id = %row.appointment_id,
        patient_id = %auth.user_id,
        doctor_id = %doctor.user_id,
        "appointment requested"
    );

    Ok(Json(ApiOk::new(row)))
}

/* ============================================================
   Listing
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<AppointmentStatus>,
}

/// Own appointments, most recent date first.
pub async fn list_my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let col = owner_column(auth.role);
    let sql = format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment
        WHERE {col} = $1
          AND ($2::smallint IS NULL OR status = $2)
        ORDER BY appt_date DESC, appt_time DESC
        "#
    );

    let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(auth.user_id)
        .bind(q.status)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

/// Doctor's pending requests, newest first.
pub async fn list_requests(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    auth.require_doctor()?;

    let rows = fetch_appointments(
        &state,
        r#"
        WHERE doctor_id = $1 AND status = 0
        ORDER BY created_at DESC
        "#,
        auth.user_id,
        None,
    )
    .await?;

    Ok(Json(ApiOk::new(rows)))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub date: Option<String>,
}

/// Doctor's confirmed appointments for one day (default today).
pub async fn get_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ScheduleQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    auth.require_doctor()?;

    let day = match q.date.as_deref() {
        Some(d) => parse_date(d)?,
        None => today(),
    };

    let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment
        WHERE doctor_id = $1
          AND status = $2
          AND appt_date = $3
        ORDER BY appt_date ASC, appt_time ASC
        "#
    ))
    .bind(auth.user_id)
    .bind(AppointmentStatus::Confirmed)
    .bind(day)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub search: Option<String>,
}

/// Doctor: completed/canceled visits, optionally by patient-name prefix.
/// Patient: everything they ever booked.
pub async fn get_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let rows = match auth.role {
        Role::Doctor => {
            let search = q.search.as_deref().map(str::trim).unwrap_or("");
            fetch_appointments(
                &state,
                r#"
                WHERE doctor_id = $1
                  AND status IN (2, 4)
                  AND starts_with(lower(patient_name), lower($2))
                ORDER BY appt_date DESC, appt_time DESC
                "#,
                auth.user_id,
                Some(search),
            )
            .await?
        }
        Role::Patient => {
            fetch_appointments(
                &state,
                r#"
                WHERE patient_id = $1
                ORDER BY appt_date DESC, appt_time DESC
                "#,
                auth.user_id,
                None,
            )
            .await?
        }
    };

    Ok(Json(ApiOk::new(rows)))
}

/// Pending and confirmed appointments from today on. `limit: None` returns
/// all of them (`LIMIT NULL` means no limit).
pub(crate) async fn upcoming_for(
    state: &AppState,
    role: Role,
    user_id: Uuid,
    limit: Option<i64>,
) -> Result<Vec<AppointmentRow>, ApiError> {
    let col = owner_column(role);
    sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment
        WHERE {col} = $1
          AND status IN (0, 1)
          AND appt_date >= $2
        ORDER BY appt_date ASC, appt_time ASC
        LIMIT $3
        "#
    ))
    .bind(user_id)
    .bind(today())
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn get_upcoming(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let rows = upcoming_for(&state, auth.role, auth.user_id, None).await?;
    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let row = load_own_appointment(&state, &auth, appointment_id).await?;
    Ok(Json(ApiOk::new(row)))
}

/* ============================================================
   DELETE /appointments/{id} (patient withdraws a pending request)
   ============================================================ */

pub async fn delete_request(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require_patient()?;
    let row = load_own_appointment(&state, &auth, appointment_id).await?;
    if row.status != AppointmentStatus::Pending {
        return Err(ApiError::Conflict(
            "INVALID_TRANSITION",
            format!("only pending requests can be deleted (this one is {})", row.status),
        ));
    }

    let res = sqlx::query(
        r#"
        DELETE FROM appointment
        WHERE appointment_id = $1 AND patient_id = $2 AND status = 0
        "#,
    )
    .bind(appointment_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "INVALID_TRANSITION",
            "request changed before it could be deleted".into(),
        ));
    }

    tracing::info!(%appointment_id, "appointment request deleted");
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

/* ============================================================
   Status transitions
   ============================================================ */

#[derive(Debug, Default)]
struct TransitionPatch {
    slot: Option<(NaiveDate, NaiveTime)>,
    notes: Option<String>,
}

fn slot_taken() -> ApiError {
    ApiError::Conflict(
        "SLOT_TAKEN",
        "The doctor already has a confirmed appointment at this time".into(),
    )
}

async fn apply_action(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
    action: Action,
    patch: TransitionPatch,
) -> Result<AppointmentRow, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1 FOR UPDATE"
    ))
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .filter(|a| a.is_participant(auth.user_id))
    .ok_or_else(|| ApiError::not_found("appointment"))?;

    let to = next_status(current.status, action, auth.role).inspect_err(|e| {
        tracing::warn!(%appointment_id, from = %current.status, error = %e, "transition refused");
    })?;

    let (date, time) = patch.slot.unwrap_or((current.appt_date, current.appt_time));

    if to == AppointmentStatus::Confirmed {
        let clash: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT appointment_id
            FROM appointment
            WHERE doctor_id = $1
              AND appt_date = $2
              AND appt_time = $3
              AND status = 1
              AND appointment_id <> $4
            LIMIT 1
            "#,
        )
        .bind(current.doctor_id)
        .bind(date)
        .bind(time)
        .bind(appointment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::db)?;

        if clash.is_some() {
            return Err(slot_taken());
        }
    }

    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET status = $2,
            appt_date = $3,
            appt_time = $4,
            notes = COALESCE($5, notes),
            updated_at = now()
        WHERE appointment_id = $1
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(to)
    .bind(date)
    .bind(time)
    .bind(patch.notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        // confirmed-slot unique index
        sqlx::Error::Database(ref db) if db.is_unique_violation() => slot_taken(),
        other => ApiError::db(other),
    })?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        %appointment_id,
        action = action.as_str(),
        from = %current.status,
        to = %row.status,
        by = %auth.user_id,
        "appointment updated"
    );

    Ok(row)
}

pub async fn approve(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let row = apply_action(&state, &auth, appointment_id, Action::Approve, TransitionPatch::default()).await?;
    Ok(Json(ApiOk::new(row)))
}

pub async fn reject(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let row = apply_action(&state, &auth, appointment_id, Action::Reject, TransitionPatch::default()).await?;
    Ok(Json(ApiOk::new(row)))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let row = apply_action(&state, &auth, appointment_id, Action::Cancel, TransitionPatch::default()).await?;
    Ok(Json(ApiOk::new(row)))
}

/// The body is optional; a bare POST completes without notes.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub notes: Option<String>,
}

pub async fn complete(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    body: Option<Json<CompleteRequest>>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let notes = body.and_then(|Json(req)| req.notes);
    let patch = TransitionPatch {
        notes: optional_text(notes, "notes", MAX_NOTES_CHARS)?,
        ..Default::default()
    };
    let row = apply_action(&state, &auth, appointment_id, Action::Complete, patch).await?;
    Ok(Json(ApiOk::new(row)))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: String,
    pub time: String,
}

pub async fn reschedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let date = parse_date(&req.date)?;
    let time = parse_time(&req.time)?;
    ensure_not_past(date, today())?;

    let patch = TransitionPatch {
        slot: Some((date, time)),
        ..Default::default()
    };
    let row = apply_action(&state, &auth, appointment_id, Action::Reschedule, patch).await?;
    Ok(Json(ApiOk::new(row)))
}


#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::test_support::{appointment, at, days_ahead, state, user};
    use sqlx::PgPool;

    async fn status_of(pool: &PgPool, appointment_id: Uuid) -> AppointmentStatus {
        sqlx::query_scalar("SELECT status FROM appointment WHERE appointment_id = $1")
            .bind(appointment_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn second_approval_of_a_slot_is_refused(pool: PgPool) {
        let state = state(pool.clone());
        let doctor = user(&pool, Role::Doctor, "Dr. Reyes").await;
        let ann = user(&pool, Role::Patient, "Ann").await;
        let bob = user(&pool, Role::Patient, "Bob").await;
        let (day, time) = (days_ahead(3), at(10, 0));

        let first = appointment(&pool, &ann, &doctor, day, time, AppointmentStatus::Pending).await;
        let second = appointment(&pool, &bob, &doctor, day, time, AppointmentStatus::Pending).await;

        let row = apply_action(&state, &doctor, first, Action::Approve, TransitionPatch::default())
            .await
            .unwrap();
        assert_eq!(row.status, AppointmentStatus::Confirmed);

        let err = apply_action(&state, &doctor, second, Action::Approve, TransitionPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SLOT_TAKEN");
        assert_eq!(status_of(&pool, second).await, AppointmentStatus::Pending);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn doctor_cannot_reschedule_onto_a_confirmed_slot(pool: PgPool) {
        let state = state(pool.clone());
        let doctor = user(&pool, Role::Doctor, "Dr. Reyes").await;
        let ann = user(&pool, Role::Patient, "Ann").await;
        let bob = user(&pool, Role::Patient, "Bob").await;
        let day = days_ahead(5);

        appointment(&pool, &ann, &doctor, day, at(9, 0), AppointmentStatus::Confirmed).await;
        let moving = appointment(&pool, &bob, &doctor, day, at(11, 0), AppointmentStatus::Confirmed).await;

        let patch = TransitionPatch { slot: Some((day, at(9, 0))), ..Default::default() };
        let err = apply_action(&state, &doctor, moving, Action::Reschedule, patch)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SLOT_TAKEN");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn patient_reschedule_returns_to_pending_at_the_new_slot(pool: PgPool) {
        let state = state(pool.clone());
        let doctor = user(&pool, Role::Doctor, "Dr. Reyes").await;
        let ann = user(&pool, Role::Patient, "Ann").await;
        let id = appointment(&pool, &ann, &doctor, days_ahead(2), at(14, 0), AppointmentStatus::Confirmed).await;

        let new_day = days_ahead(9);
        let patch = TransitionPatch { slot: Some((new_day, at(15, 30))), ..Default::default() };
        let row = apply_action(&state, &ann, id, Action::Reschedule, patch).await.unwrap();

        assert_eq!(row.status, AppointmentStatus::Pending);
        assert_eq!(row.appt_date, new_day);
        assert_eq!(row.appt_time, at(15, 30));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn only_pending_requests_can_be_deleted(pool: PgPool) {
        let state = state(pool.clone());
        let doctor = user(&pool, Role::Doctor, "Dr. Reyes").await;
        let ann = user(&pool, Role::Patient, "Ann").await;
        let confirmed = appointment(&pool, &ann, &doctor, days_ahead(1), at(8, 0), AppointmentStatus::Confirmed).await;
        let pending = appointment(&pool, &ann, &doctor, days_ahead(1), at(9, 0), AppointmentStatus::Pending).await;

        let err = delete_request(State(state.clone()), ann.clone(), Path(confirmed))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(status_of(&pool, confirmed).await, AppointmentStatus::Confirmed);

        delete_request(State(state.clone()), ann.clone(), Path(pending)).await.unwrap();
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointment WHERE appointment_id = $1")
            .bind(pending)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn upcoming_is_unbounded_unless_limited(pool: PgPool) {
        let state = state(pool.clone());
        let doctor = user(&pool, Role::Doctor, "Dr. Reyes").await;
        let ann = user(&pool, Role::Patient, "Ann").await;
        for days in [4, 2, 6] {
            appointment(&pool, &ann, &doctor, days_ahead(days), at(10, 0), AppointmentStatus::Pending).await;
        }
        appointment(&pool, &ann, &doctor, days_ahead(3), at(10, 0), AppointmentStatus::Canceled).await;

        let all = upcoming_for(&state, Role::Patient, ann.user_id, None).await.unwrap();
        let dates: Vec<NaiveDate> = all.iter().map(|a| a.appt_date).collect();
        assert_eq!(dates, vec![days_ahead(2), days_ahead(4), days_ahead(6)]);

        let next = upcoming_for(&state, Role::Doctor, doctor.user_id, Some(1)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].appt_date, days_ahead(2));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn complete_without_body_succeeds(pool: PgPool) {
        let state = state(pool.clone());
        let doctor = user(&pool, Role::Doctor, "Dr. Reyes").await;
        let ann = user(&pool, Role::Patient, "Ann").await;
        let id = appointment(&pool, &ann, &doctor, days_ahead(1), at(13, 0), AppointmentStatus::Confirmed).await;

        let Json(done) = complete(State(state), doctor, Path(id), None).await.unwrap();
        assert_eq!(done.data.status, AppointmentStatus::Completed);
        assert_eq!(done.data.notes, None);
    }
}
