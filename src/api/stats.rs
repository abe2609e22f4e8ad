use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::CurrentUser;
use super::{ApiError, ApiResponse, AppState};
use crate::services::Viewer;
use crate::services::stats_service::{RecentlyAddedMedia, UserWatchDetails, UserWatchStat};

const RECENTLY_ADDED_COUNT: u32 = 12;

#[derive(Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
}

impl From<&CurrentUser> for Viewer {
    fn from(user: &CurrentUser) -> Self {
        Self {
            username: user.username.clone(),
            is_admin: user.is_admin(),
        }
    }
}

/// GET /stats
pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<ApiResponse<Vec<UserWatchStat>>>, ApiError> {
    let days = query.days.unwrap_or(7).max(1);
    let stats = state
        .shared
        .stats_service
        .get_watch_stats(days, &Viewer::from(&user))
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// GET /stats/user/{username}
pub async fn get_user_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(username): Path<String>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<ApiResponse<UserWatchDetails>>, ApiError> {
    let days = query.days.unwrap_or(365).max(1);
    let details = state
        .shared
        .stats_service
        .get_user_watch_details(&username, days, &Viewer::from(&user))
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// GET /stats/recently-added
pub async fn get_recently_added(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<RecentlyAddedMedia>>>, ApiError> {
    let media = state
        .shared
        .stats_service
        .get_recently_added(RECENTLY_ADDED_COUNT)
        .await?;
    Ok(Json(ApiResponse::success(media)))
}
