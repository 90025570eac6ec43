//! Fixtures for tests that run against a migrated database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::appointments::AppointmentStatus;
use crate::live::LiveHub;
use crate::middleware::auth_context::AuthContext;
use crate::models::{AppState, Role};
use crate::storage::{FileStore, StorageError};

/// Keeps record bytes in memory.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<Uuid, Vec<u8>>>,
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(&self, key: Uuid, bytes: &[u8]) -> Result<(), StorageError> {
        self.files.lock().unwrap().insert(key, bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: Uuid) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound(key))
    }

    async fn delete(&self, key: Uuid) -> Result<(), StorageError> {
        self.files.lock().unwrap().remove(&key);
        Ok(())
    }
}

pub fn state_with(pool: PgPool, files: Arc<dyn FileStore>) -> AppState {
    AppState {
        db: pool,
        session_ttl_hours: 24,
        max_record_bytes: 1024 * 1024,
        live: LiveHub::new(),
        files,
    }
}

pub fn state(pool: PgPool) -> AppState {
    state_with(pool, Arc::new(MemoryFileStore::default()))
}

/// Inserts an active user and returns the identity a request from them
/// would carry.
pub async fn user(pool: &PgPool, role: Role, name: &str) -> AuthContext {
    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO app_user (email, display_name, password_hash, roles)
        VALUES ($1, $2, 'not-a-real-hash', $3)
        RETURNING user_id
        "#,
    )
    .bind(format!("{}@example.test", Uuid::new_v4().simple()))
    .bind(name)
    .bind(role)
    .fetch_one(pool)
    .await
    .unwrap();

    AuthContext {
        user_id,
        role,
        display_name: name.to_string(),
        session_token_id: Uuid::new_v4(),
    }
}

pub async fn appointment(
    pool: &PgPool,
    patient: &AuthContext,
    doctor: &AuthContext,
    date: NaiveDate,
    time: NaiveTime,
    status: AppointmentStatus,
) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO appointment
            (patient_id, patient_name, doctor_id, doctor_name, appt_date, appt_time, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING appointment_id
        "#,
    )
    .bind(patient.user_id)
    .bind(&patient.display_name)
    .bind(doctor.user_id)
    .bind(&doctor.display_name)
    .bind(date)
    .bind(time)
    .bind(status)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub fn days_ahead(days: u64) -> NaiveDate {
    Utc::now().date_naive() + Days::new(days)
}

pub fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}
