use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod conversation_routes;
pub mod dashboard_routes;
pub mod home_routes;
pub mod patient_routes;
pub mod profile_routes;
pub mod record_routes;

pub fn router(state: AppState) -> Router {
    let max_record_bytes = state.max_record_bytes;

    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", profile_routes::router())
        .nest("/api/v1", home_routes::router())
        .nest("/api/v1", dashboard_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", patient_routes::router())
        .nest("/api/v1", conversation_routes::router())
        .nest("/api/v1", record_routes::router(max_record_bytes))
        .with_state(state)
}
