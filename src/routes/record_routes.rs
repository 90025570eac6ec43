// src/routes/record_routes.rs

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData},
    routes::patient_routes::{ensure_care_relation, has_care_relation},
    storage::decode_upload,
};

const MAX_NAME_CHARS: usize = 255;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// `max_record_bytes` limits decoded bytes; the JSON body carries base64.
pub fn router(max_record_bytes: usize) -> Router<AppState> {
    let body_limit = max_record_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/records", get(list_my_records).post(upload_my_record))
        .route(
            "/patients/{patient_id}/records",
            get(list_patient_records).post(upload_patient_record),
        )
        .route("/records/{record_id}", get(get_record).delete(delete_record))
        .route("/records/{record_id}/file", get(download_record))
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub record_id: Uuid,
    pub patient_id: Uuid,
    pub uploaded_by: Uuid,
    pub name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub upload_date: DateTime<Utc>,
}

const RECORD_COLUMNS: &str =
    "record_id, patient_id, uploaded_by, name, content_type, size_bytes, upload_date";

#[derive(Debug, Serialize)]
pub struct RecordDto {
    pub record_id: Uuid,
    pub patient_id: Uuid,
    pub uploaded_by: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size_bytes: i64,
    pub upload_date: DateTime<Utc>,
    pub url: String,
}

impl From<RecordRow> for RecordDto {
    fn from(r: RecordRow) -> Self {
        Self {
            url: format!("/api/v1/records/{}/file", r.record_id),
            record_id: r.record_id,
            patient_id: r.patient_id,
            uploaded_by: r.uploaded_by,
            name: r.name,
            content_type: r.content_type,
            size_bytes: r.size_bytes,
            upload_date: r.upload_date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub name: String,
    pub content_type: Option<String>,
    /// base64, optionally as a `data:` URL
    pub file_data: String,
}

fn clean_name(raw: &str) -> Result<String, ApiError> {
    // keep only the final path component of whatever the browser sent
    let name = raw.trim().rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::validation(format!("name must be at most {MAX_NAME_CHARS} characters")));
    }
    Ok(name.to_string())
}

fn clean_content_type(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|s| s.contains('/') && !s.chars().any(|c| c.is_whitespace() || c.is_control()))
        .map(str::to_lowercase)
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Header values must be visible ASCII.
fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

async fn list_for(state: &AppState, patient_id: Uuid) -> Result<Vec<RecordDto>, ApiError> {
    let rows: Vec<RecordRow> = sqlx::query_as::<_, RecordRow>(&format!(
        r#"
        SELECT {RECORD_COLUMNS}
        FROM medical_record
        WHERE patient_id = $1
        ORDER BY upload_date DESC
        "#
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(rows.into_iter().map(RecordDto::from).collect())
}

async fn store_record(
    state: &AppState,
    auth: &AuthContext,
    patient_id: Uuid,
    req: UploadRequest,
) -> Result<RecordDto, ApiError> {
    let name = clean_name(&req.name)?;
    let content_type = clean_content_type(req.content_type.as_deref());
    let bytes = decode_upload(&req.file_data, state.max_record_bytes)?;

    let record_id = Uuid::new_v4();
    state.files.put(record_id, &bytes).await?;

    let inserted = sqlx::query_as::<_, RecordRow>(&format!(
        r#"
        INSERT INTO medical_record (record_id, patient_id, uploaded_by, name, content_type, size_bytes)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {RECORD_COLUMNS}
        "#
    ))
    .bind(record_id)
    .bind(patient_id)
    .bind(auth.user_id)
    .bind(&name)
    .bind(&content_type)
    .bind(bytes.len() as i64)
    .fetch_one(&state.db)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(e) => {
            if let Err(cleanup) = state.files.delete(record_id).await {
                tracing::error!(%record_id, error = %cleanup, "orphaned record file");
            }
            return Err(ApiError::db(e));
        }
    };

    tracing::info!(
        %record_id,
        %patient_id,
        uploaded_by = %auth.user_id,
        size = bytes.len(),
        "medical record uploaded"
    );
    Ok(row.into())
}

/// Owner patient, or a doctor the patient has booked with.
async fn load_accessible_record(
    state: &AppState,
    auth: &AuthContext,
    record_id: Uuid,
) -> Result<RecordRow, ApiError> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM medical_record WHERE record_id = $1"
    ))
    .bind(record_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("record"))?;

    let allowed = if auth.is_patient() {
        row.patient_id == auth.user_id
    } else {
        has_care_relation(state, auth.user_id, row.patient_id).await?
    };

    if allowed {
        Ok(row)
    } else {
        Err(ApiError::not_found("record"))
    }
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn list_my_records(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<RecordDto>>>, ApiError> {
    auth.require_patient()?;
    Ok(Json(ApiOk::new(list_for(&state, auth.user_id).await?)))
}

pub async fn upload_my_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UploadRequest>,
) -> Result<Json<ApiOk<RecordDto>>, ApiError> {
    auth.require_patient()?;
    let dto = store_record(&state, &auth, auth.user_id, req).await?;
    Ok(Json(ApiOk::new(dto)))
}

pub async fn list_patient_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<RecordDto>>>, ApiError> {
    ensure_care_relation(&state, &auth, patient_id).await?;
    Ok(Json(ApiOk::new(list_for(&state, patient_id).await?)))
}

pub async fn upload_patient_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<ApiOk<RecordDto>>, ApiError> {
    ensure_care_relation(&state, &auth, patient_id).await?;
    let dto = store_record(&state, &auth, patient_id, req).await?;
    Ok(Json(ApiOk::new(dto)))
}

pub async fn get_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<RecordDto>>, ApiError> {
    let row = load_accessible_record(&state, &auth, record_id).await?;
    Ok(Json(ApiOk::new(row.into())))
}

pub async fn download_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = load_accessible_record(&state, &auth, record_id).await?;
    let bytes = state.files.get(record_id).await?;

    let disposition = format!("attachment; filename=\"{}\"", header_safe_filename(&row.name));
    Ok((
        [
            (header::CONTENT_TYPE, row.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

pub async fn delete_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require_patient()?;

    let res = sqlx::query(
        r#"
        DELETE FROM medical_record
        WHERE record_id = $1 AND patient_id = $2
        "#,
    )
    .bind(record_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("record"));
    }

    // the row is gone either way; leftover bytes are unreachable
    if let Err(e) = state.files.delete(record_id).await {
        tracing::error!(%record_id, error = %e, "orphaned record file");
    }
    tracing::info!(%record_id, "medical record deleted");

    Ok(Json(ApiOk::new(OkData { ok: true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_lose_their_directories() {
        assert_eq!(clean_name("C:\\Users\\ann\\scan.pdf").unwrap(), "scan.pdf");
        assert_eq!(clean_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(clean_name(" lab results.png ").unwrap(), "lab results.png");
        assert!(clean_name("   ").is_err());
        assert!(clean_name("folder/").is_err());
        assert!(clean_name(&"a".repeat(MAX_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(clean_content_type(Some("Application/PDF")), "application/pdf");
        assert_eq!(clean_content_type(None), DEFAULT_CONTENT_TYPE);
        assert_eq!(clean_content_type(Some("pdf")), DEFAULT_CONTENT_TYPE);
        assert_eq!(clean_content_type(Some("text/html\r\nX-Evil: 1")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn download_filename_is_header_safe() {
        assert_eq!(header_safe_filename("résumé \"v2\".pdf"), "r_sum_ _v2_.pdf");
    }

    #[test]
    fn dto_exposes_download_url_and_type() {
        let id = Uuid::new_v4();
        let dto = RecordDto::from(RecordRow {
            record_id: id,
            patient_id: Uuid::new_v4(),
            uploaded_by: Uuid::new_v4(),
            name: "xray.png".into(),
            content_type: "image/png".into(),
            size_bytes: 2048,
            upload_date: Utc::now(),
        });
        let v = serde_json::to_value(&dto).unwrap();
        assert_eq!(v["url"], format!("/api/v1/records/{id}/file"));
        assert_eq!(v["type"], "image/png");
    }
}

#[cfg(test)]
mod db_tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use sqlx::PgPool;

    use super::*;
    use crate::models::Role;
    use crate::storage::{FileStore, StorageError};
    use crate::test_support::{state_with, user};

    /// Accepts writes, fails every delete.
    struct StickyFileStore;

    #[async_trait]
    impl FileStore for StickyFileStore {
        async fn put(&self, _key: Uuid, _bytes: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }

        async fn get(&self, key: Uuid) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(key))
        }

        async fn delete(&self, _key: Uuid) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk unavailable")))
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_succeeds_when_the_file_cannot_be_removed(pool: PgPool) {
        let state = state_with(pool.clone(), Arc::new(StickyFileStore));
        let ann = user(&pool, Role::Patient, "Ann").await;

        let dto = store_record(
            &state,
            &ann,
            ann.user_id,
            UploadRequest {
                name: "labs.pdf".into(),
                content_type: Some("application/pdf".into()),
                file_data: "JVBERi0xLjc=".into(),
            },
        )
        .await
        .unwrap();

        let Json(res) = delete_record(State(state), ann, Path(dto.record_id)).await.unwrap();
        assert!(res.data.ok);

        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM medical_record WHERE record_id = $1")
            .bind(dto.record_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }
}
