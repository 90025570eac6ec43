use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::live::LiveHub;
use crate::storage::FileStore;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub max_record_bytes: usize,
    pub live: LiveHub,
    pub files: Arc<dyn FileStore>,
}

/* -------------------------
   Shared envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

/* -------------------------
   Role
--------------------------*/

/// Stored as smallint in `app_user.roles`: 0 patient, 1 doctor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Doctor = 1,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }

    pub fn counterpart(self) -> Role {
        match self {
            Role::Patient => Role::Doctor,
            Role::Doctor => Role::Patient,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/* -------------------------
   Users
--------------------------*/

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: Role,
    pub is_active: bool,
    pub specialization: Option<String>,
    pub clinic_address: Option<String>,
    pub available_hours: Option<serde_json::Value>,
    pub age: Option<i32>,
    pub contact_info: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = r#"
    user_id, email, display_name, password_hash, roles, is_active,
    specialization, clinic_address, available_hours, age, contact_info, created_at
"#;

/// Profile as returned to the owner. Role-specific fields are omitted for the
/// other role.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_hours: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for UserProfile {
    fn from(u: UserRow) -> Self {
        let doctor = u.roles == Role::Doctor;
        Self {
            user_id: u.user_id,
            email: u.email,
            name: u.display_name,
            role: u.roles,
            specialization: if doctor { u.specialization } else { None },
            clinic_address: if doctor { u.clinic_address } else { None },
            available_hours: if doctor { u.available_hours } else { None },
            age: if doctor { None } else { u.age },
            contact_info: if doctor { None } else { u.contact_info },
            created_at: u.created_at,
        }
    }
}

/// What other users may see about someone.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_address: Option<String>,
}

impl From<UserRow> for PublicProfile {
    fn from(u: UserRow) -> Self {
        let doctor = u.roles == Role::Doctor;
        Self {
            user_id: u.user_id,
            name: u.display_name,
            role: u.roles,
            specialization: if doctor { u.specialization } else { None },
            clinic_address: if doctor { u.clinic_address } else { None },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
