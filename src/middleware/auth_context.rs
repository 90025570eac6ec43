use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};

/// The signed-in identity behind a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub display_name: String,
    pub session_token_id: Uuid,
}

impl AuthContext {
    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }

    pub fn is_patient(&self) -> bool {
        self.role == Role::Patient
    }

    pub fn require_doctor(&self) -> Result<(), ApiError> {
        if self.is_doctor() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Only doctors can do this"))
        }
    }

    pub fn require_patient(&self) -> Result<(), ApiError> {
        if self.is_patient() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Only patients can do this"))
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    roles: Role,
    display_name: String,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.roles, u.display_name
                FROM session_token st
                JOIN app_user u ON u.user_id = st.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            // best-effort
            if let Err(e) = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await
            {
                tracing::warn!(error = %e, "failed to touch session last_seen_at");
            }

            Ok(AuthContext {
                user_id: row.user_id,
                role: row.roles,
                display_name: row.display_name,
                session_token_id: row.session_token_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            display_name: "Someone".into(),
            session_token_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn role_guards() {
        assert!(ctx(Role::Doctor).require_doctor().is_ok());
        assert!(ctx(Role::Doctor).require_patient().is_err());
        assert!(ctx(Role::Patient).require_patient().is_ok());

        let err = ctx(Role::Patient).require_doctor().unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}
