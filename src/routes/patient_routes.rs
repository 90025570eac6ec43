// src/routes/patient_routes.rs
//
// A doctor's view of the patients they have appointments with.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role},
    routes::auth_routes::load_user,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(my_patients))
        .route("/patients/{patient_id}", get(get_patient))
}

/// A doctor may see a patient once the patient has booked with them and
/// the request was not rejected.
pub(crate) async fn has_care_relation(
    state: &AppState,
    doctor_id: Uuid,
    patient_id: Uuid,
) -> Result<bool, ApiError> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM appointment
            WHERE doctor_id = $1
              AND patient_id = $2
              AND status <> 3
        )
        "#,
    )
    .bind(doctor_id)
    .bind(patient_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)
}

pub(crate) async fn ensure_care_relation(
    state: &AppState,
    auth: &AuthContext,
    patient_id: Uuid,
) -> Result<(), ApiError> {
    auth.require_doctor()?;
    if has_care_relation(state, auth.user_id, patient_id).await? {
        Ok(())
    } else {
        tracing::warn!(doctor_id = %auth.user_id, %patient_id, "doctor without care relation");
        Err(ApiError::forbidden("You have no appointments with this patient"))
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientListRow {
    pub patient_id: Uuid,
    pub name: String,
    pub age: Option<i32>,
    pub contact_info: Option<String>,
    pub appointment_count: i64,
    pub last_visit: Option<NaiveDate>,
    pub next_visit: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PatientSearchQuery {
    pub search: Option<String>,
}

pub async fn my_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<PatientSearchQuery>,
) -> Result<Json<ApiOk<Vec<PatientListRow>>>, ApiError> {
    auth.require_doctor()?;
    let search = q.search.as_deref().map(str::trim).unwrap_or("");

    let rows: Vec<PatientListRow> = sqlx::query_as::<_, PatientListRow>(
        r#"
        SELECT
          u.user_id AS patient_id,
          u.display_name AS name,
          u.age,
          u.contact_info,
          COUNT(*) AS appointment_count,
          MAX(a.appt_date) FILTER (WHERE a.status = 4) AS last_visit,
          MIN(a.appt_date) FILTER (WHERE a.status IN (0, 1) AND a.appt_date >= $2) AS next_visit
        FROM appointment a
        JOIN app_user u ON u.user_id = a.patient_id
        WHERE a.doctor_id = $1
          AND a.status <> 3
          AND ($3 = '' OR position(lower($3) in lower(u.display_name)) > 0)
        GROUP BY u.user_id, u.display_name, u.age, u.contact_info
        ORDER BY u.display_name ASC
        "#,
    )
    .bind(auth.user_id)
    .bind(Utc::now().date_naive())
    .bind(search)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows)))
}

#[derive(Debug, Serialize)]
pub struct PatientDetail {
    pub patient_id: Uuid,
    pub name: String,
    pub email: String,
    pub age: Option<i32>,
    pub contact_info: Option<String>,
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientDetail>>, ApiError> {
    ensure_care_relation(&state, &auth, patient_id).await?;

    let user = load_user(&state, patient_id)
        .await?
        .filter(|u| u.roles == Role::Patient)
        .ok_or_else(|| ApiError::not_found("patient"))?;

    Ok(Json(ApiOk::new(PatientDetail {
        patient_id: user.user_id,
        name: user.display_name,
        email: user.email,
        age: user.age,
        contact_info: user.contact_info,
    })))
}
