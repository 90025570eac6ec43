// src/routes/auth_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{
        generate_access_token, hash_access_token, hash_password, normalize_email,
        validate_display_name, validate_password, verify_password,
    },
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, OkData, Role, SessionInfo, SessionTokenRow, UserProfile, UserRow,
        USER_COLUMNS,
    },
};

const REMEMBER_ME_TTL_HOURS: i64 = 24 * 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/logout_all_except_current", post(logout_all_except_current))
        // Rotate access token for the current session (invalidates old token immediately)
        .route("/refresh", post(refresh))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{session_token_id}/revoke", post(revoke_session))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub specialization: Option<String>,
    pub clinic_address: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SessionGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

/// Doctor registration needs both practice fields.
fn doctor_fields(req: &SignupRequest) -> Result<(Option<String>, Option<String>), ApiError> {
    if req.role != Role::Doctor {
        return Ok((None, None));
    }
    let clean = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    match (clean(&req.specialization), clean(&req.clinic_address)) {
        (Some(specialty), Some(addr)) => Ok((Some(specialty), Some(addr))),
        _ => Err(ApiError::validation(
            "Specialization and clinic address are required for doctors",
        )),
    }
}

/* ============================================================
   Session issuing
   ============================================================ */

async fn issue_session(
    state: &AppState,
    user_id: Uuid,
    device_name: Option<&str>,
    ttl_hours: i64,
) -> Result<(String, SessionTokenRow), ApiError> {
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user_id)
    .bind(&token_hash)
    .bind(device_name)
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok((access_token, session))
}

pub(crate) async fn load_user(state: &AppState, user_id: Uuid) -> Result<Option<UserRow>, ApiError> {
    sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM app_user WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)
}

/* ============================================================
   POST /auth/signup
   ============================================================ */

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<ApiOk<SessionGrant>>, ApiError> {
    let name = validate_display_name(&req.name)?;
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    let (specialization, clinic_address) = doctor_fields(&req)?;

    let password_hash = hash_password(&req.password)?;
    let available_hours = (req.role == Role::Doctor).then(|| serde_json::json!({}));
    let contact_info = (req.role == Role::Patient).then(String::new);

    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        INSERT INTO app_user
            (email, display_name, password_hash, roles,
             specialization, clinic_address, available_hours, contact_info)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .bind(req.role)
    .bind(specialization)
    .bind(clinic_address)
    .bind(available_hours)
    .bind(contact_info)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => ApiError::Conflict(
            "EMAIL_TAKEN",
            "This email is already registered".into(),
        ),
        other => ApiError::db(other),
    })?;

    let (access_token, session) =
        issue_session(&state, user.user_id, req.device_name.as_deref(), state.session_ttl_hours).await?;

    tracing::info!(user_id = %user.user_id, role = %user.roles, "user signed up");

    Ok(Json(ApiOk::new(SessionGrant {
        access_token,
        expires_at: session.expires_at,
        user: user.into(),
    })))
}

/* ============================================================
   POST /auth/login
   ============================================================ */

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<SessionGrant>>, ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }
    let email = req.email.trim().to_lowercase();

    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM app_user WHERE email = $1"
    ))
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        tracing::warn!(user_id = %user.user_id, "login with wrong password");
        return Err(ApiError::invalid_credentials());
    }

    if !user.is_active {
        return Err(ApiError::forbidden("Account is disabled"));
    }

    let ttl_hours = if req.remember_me.unwrap_or(false) {
        REMEMBER_ME_TTL_HOURS
    } else {
        state.session_ttl_hours
    };

    let (access_token, session) =
        issue_session(&state, user.user_id, req.device_name.as_deref(), ttl_hours).await?;

    tracing::info!(user_id = %user.user_id, "user logged in");

    Ok(Json(ApiOk::new(SessionGrant {
        access_token,
        expires_at: session.expires_at,
        user: user.into(),
    })))
}

/* ============================================================
   GET /auth/me
   ============================================================ */

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let user = load_user(&state, auth.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(ApiError::session_expired)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk::new(MeData {
        user: user.into(),
        session: SessionInfo {
            session_token_id: session.session_token_id,
            expires_at: session.expires_at,
        },
    })))
}

/* ============================================================
   Logout / refresh
   ============================================================ */

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk::new(OkData { ok: true })))
}

#[derive(Debug, Serialize)]
pub struct RevokeAllData {
    pub ok: bool,
    pub revoked_count: i64,
}

pub async fn logout_all_except_current(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<RevokeAllData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(RevokeAllData {
        ok: true,
        revoked_count: res.rows_affected() as i64,
    })))
}

#[derive(Debug, Serialize)]
pub struct RefreshData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub session_token_id: Uuid,
}

/// Same session id, new token; the old token stops working immediately.
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<RefreshData>>, ApiError> {
    let new_token = generate_access_token();

    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        UPDATE session_token
        SET session_token_hash = $1,
            last_seen_at = now()
        WHERE session_token_id = $2
          AND user_id = $3
          AND revoked_at IS NULL
          AND expires_at > now()
        RETURNING expires_at
        "#,
    )
    .bind(hash_access_token(&new_token))
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    let expires_at = row.ok_or_else(ApiError::session_expired)?.0;

    Ok(Json(ApiOk::new(RefreshData {
        access_token: new_token,
        expires_at,
        session_token_id: auth.session_token_id,
    })))
}

/* ============================================================
   Sessions
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SessionListItem {
    pub session_token_id: Uuid,
    pub device_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsData {
    pub sessions: Vec<SessionListItem>,
    pub current_session_token_id: Uuid,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ListSessionsData>>, ApiError> {
    let sessions: Vec<SessionListItem> = sqlx::query_as::<_, SessionListItem>(
        r#"
        SELECT session_token_id, device_name, expires_at, last_seen_at, created_at
        FROM session_token
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        ORDER BY last_seen_at DESC NULLS LAST, created_at DESC
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(ListSessionsData {
        sessions,
        current_session_token_id: auth.session_token_id,
    })))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_token_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("session"));
    }

    Ok(Json(ApiOk::new(OkData { ok: true })))
}
