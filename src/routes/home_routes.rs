use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, Role};
use crate::navigation::{NavItem, home_path, nav_for};

#[derive(Serialize)]
pub struct HomeData {
    pub role: Role,
    pub redirect_to: String,
}

#[derive(Serialize)]
pub struct NavData {
    pub role: Role,
    pub items: Vec<NavItem>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/home", get(home))
        .route("/nav", get(nav))
}

pub async fn home(
    State(_state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<HomeData>>, ApiError> {
    Ok(Json(ApiOk::new(HomeData {
        role: auth.role,
        redirect_to: home_path(auth.role),
    })))
}

pub async fn nav(
    State(_state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<NavData>>, ApiError> {
    Ok(Json(ApiOk::new(NavData {
        role: auth.role,
        items: nav_for(auth.role),
    })))
}
