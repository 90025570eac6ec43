// src/routes/profile_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{de::Deserializer, Deserialize};
use uuid::Uuid;

use crate::{
    auth::validate_display_name,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, PublicProfile, Role, UserProfile, UserRow, USER_COLUMNS},
    routes::auth_routes::load_user,
};

const MAX_AGE: i32 = 150;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_my_profile).patch(update_my_profile))
        .route("/doctors", get(list_doctors))
        .route("/users/{user_id}", get(get_profile))
}

/// Present-but-null becomes `Some(None)`, absent stays `None`.
fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    // doctor
    pub specialization: Option<String>,
    pub clinic_address: Option<String>,
    pub available_hours: Option<serde_json::Value>,
    // patient
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub age: Option<Option<i32>>,
    pub contact_info: Option<String>,
}

impl UpdateProfileRequest {
    fn validate_for(&self, role: Role) -> Result<(), ApiError> {
        let doctor_only = self.specialization.is_some()
            || self.clinic_address.is_some()
            || self.available_hours.is_some();
        let patient_only = self.age.is_some() || self.contact_info.is_some();

        match role {
            Role::Patient if doctor_only => {
                return Err(ApiError::validation("Patients have no practice fields"));
            }
            Role::Doctor if patient_only => {
                return Err(ApiError::validation("Doctors have no age or contact info"));
            }
            _ => {}
        }

        if let Some(Some(age)) = self.age {
            if !(0..=MAX_AGE).contains(&age) {
                return Err(ApiError::validation(format!("age must be between 0 and {MAX_AGE}")));
            }
        }
        for (field, value) in [
            ("specialization", &self.specialization),
            ("clinic_address", &self.clinic_address),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ApiError::validation(format!("{field} cannot be empty")));
            }
        }
        if let Some(hours) = &self.available_hours {
            if !hours.is_object() {
                return Err(ApiError::validation("available_hours must be an object"));
            }
        }
        Ok(())
    }
}

pub async fn get_my_profile(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    let user = load_user(&state, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("profile"))?;
    Ok(Json(ApiOk::new(user.into())))
}

pub async fn update_my_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    req.validate_for(auth.role)?;
    let name = req.name.as_deref().map(validate_display_name).transpose()?;

    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        UPDATE app_user
        SET
          display_name    = COALESCE($2, display_name),
          specialization  = COALESCE($3, specialization),
          clinic_address  = COALESCE($4, clinic_address),
          available_hours = COALESCE($5, available_hours),
          age             = CASE WHEN $6 THEN $7 ELSE age END,
          contact_info    = COALESCE($8, contact_info),
          updated_at      = now()
        WHERE user_id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(auth.user_id)
    .bind(name)
    .bind(req.specialization.as_deref().map(str::trim))
    .bind(req.clinic_address.as_deref().map(str::trim))
    .bind(req.available_hours)
    .bind(req.age.is_some())
    .bind(req.age.flatten())
    .bind(req.contact_info.as_deref().map(str::trim))
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("profile"))?;

    tracing::info!(user_id = %auth.user_id, "profile updated");
    Ok(Json(ApiOk::new(user.into())))
}

#[derive(Debug, Deserialize)]
pub struct DoctorSearchQuery {
    pub search: Option<String>,
}

/// Active doctors whose name or specialization contains `search`.
pub async fn list_doctors(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<DoctorSearchQuery>,
) -> Result<Json<ApiOk<Vec<PublicProfile>>>, ApiError> {
    let search = q.search.as_deref().map(str::trim).unwrap_or("");

    let rows: Vec<UserRow> = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM app_user
        WHERE roles = $1
          AND is_active = true
          AND ($2 = ''
               OR position(lower($2) in lower(display_name)) > 0
               OR position(lower($2) in lower(coalesce(specialization, ''))) > 0)
        ORDER BY display_name ASC
        "#
    ))
    .bind(Role::Doctor)
    .bind(search)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(rows.into_iter().map(PublicProfile::from).collect())))
}

pub async fn get_profile(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<PublicProfile>>, ApiError> {
    let user = load_user(&state, user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::not_found("user"))?;
    Ok(Json(ApiOk::new(user.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> UpdateProfileRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn age_distinguishes_null_from_absent() {
        assert_eq!(parse(r#"{}"#).age, None);
        assert_eq!(parse(r#"{"age":null}"#).age, Some(None));
        assert_eq!(parse(r#"{"age":33}"#).age, Some(Some(33)));
    }

    #[test]
    fn fields_must_match_role() {
        assert!(parse(r#"{"specialization":"ENT"}"#).validate_for(Role::Patient).is_err());
        assert!(parse(r#"{"contact_info":"555"}"#).validate_for(Role::Doctor).is_err());
        assert!(parse(r#"{"specialization":"ENT"}"#).validate_for(Role::Doctor).is_ok());
        assert!(parse(r#"{"age":30,"contact_info":"555"}"#).validate_for(Role::Patient).is_ok());
    }

    #[test]
    fn value_checks() {
        assert!(parse(r#"{"age":151}"#).validate_for(Role::Patient).is_err());
        assert!(parse(r#"{"age":-1}"#).validate_for(Role::Patient).is_err());
        assert!(parse(r#"{"clinic_address":"  "}"#).validate_for(Role::Doctor).is_err());
        assert!(parse(r#"{"available_hours":[1,2]}"#).validate_for(Role::Doctor).is_err());
        assert!(parse(r#"{"available_hours":{"mon":"9-5"}}"#).validate_for(Role::Doctor).is_ok());
    }
}
