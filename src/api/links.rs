use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

use super::{ApiError, AppState};

/// `GET /s/{code}`
pub async fn redirect_short_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match state.shared.link_shortener.resolve(&code).await {
        Ok(Some(url)) => Redirect::temporary(&url).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Link não encontrado.").into_response(),
        Err(e) => ApiError::internal(e.to_string()).into_response(),
    }
}
