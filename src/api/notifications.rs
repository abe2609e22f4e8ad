use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::db::Notification;

const NOTIFICATION_LIMIT: u64 = 15;

#[derive(Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
}

/// GET /notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<NotificationList>>, ApiError> {
    let store = &state.shared.store;
    let notifications = store.get_notifications(NOTIFICATION_LIMIT, true).await?;
    let unread_count = store.unread_notification_count().await?;

    Ok(Json(ApiResponse::success(NotificationList {
        notifications,
        unread_count,
    })))
}

/// POST /notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let count = state.shared.store.mark_all_notifications_read().await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(format!(
        "{count} notificações marcadas como lidas."
    )))))
}

/// POST /notifications/clear-all
pub async fn clear_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let count = state.shared.store.delete_all_notifications().await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(format!(
        "{count} notificações foram limpas com sucesso."
    )))))
}
