use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::services::{
    AuthError, InviteError, NotifierError, PaymentError, PlexError, StatsError, SubscriptionError,
    SystemError,
};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    DatabaseError(String),

    ExternalApiError { service: String, message: String },

    ServiceUnavailable(String),

    ValidationError(String),

    Forbidden(String),

    Conflict(String),

    /// The resource existed but may no longer be used.
    Gone(String),

    InternalError(String),

    Unauthorized(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            Self::ExternalApiError { service, message } => write!(f, "{service} error: {message}"),
            Self::ServiceUnavailable(msg) => write!(f, "Service unavailable: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::Gone(msg) => write!(f, "Gone: {msg}"),
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::DatabaseError(msg) => {
                tracing::error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Ocorreu um erro na base de dados.".to_string(),
                )
            }
            Self::ExternalApiError { service, message } => {
                tracing::warn!(service = %service, error = %message, "Upstream API error");
                (StatusCode::BAD_GATEWAY, message)
            }
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Gone(msg) => (StatusCode::GONE, msg),
            Self::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Ocorreu um erro interno.".to_string(),
                )
            }
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::Unauthorized(err.to_string()),
            AuthError::UserNotFound => Self::NotFound(err.to_string()),
            AuthError::Validation(msg) => Self::ValidationError(msg),
            AuthError::Database(msg) => Self::DatabaseError(msg),
            AuthError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<PlexError> for ApiError {
    fn from(err: PlexError) -> Self {
        match err {
            PlexError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            PlexError::UserNotFound(msg) => Self::NotFound(msg),
            PlexError::Validation(msg) => Self::ValidationError(msg),
            PlexError::Upstream(message) => Self::plex(message),
            PlexError::Database(msg) => Self::DatabaseError(msg),
            PlexError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<NotifierError> for ApiError {
    fn from(err: NotifierError) -> Self {
        match err {
            NotifierError::NotConfigured(msg) | NotifierError::ConditionMissing(msg) => {
                Self::ValidationError(msg)
            }
            NotifierError::Tautulli(message) => Self::tautulli(message),
            NotifierError::Database(msg) => Self::DatabaseError(msg),
            NotifierError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::NotFound(msg) => Self::NotFound(msg),
            InviteError::Invalid(msg) | InviteError::Validation(msg) => Self::ValidationError(msg),
            InviteError::Conflict(msg) => Self::Conflict(msg),
            InviteError::InvalidToken => Self::Unauthorized(err.to_string()),
            InviteError::Plex(message) => Self::plex(message),
            InviteError::Database(msg) => Self::DatabaseError(msg),
            InviteError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::UserNotFound(msg) => Self::NotFound(msg),
            SubscriptionError::Validation(msg) => Self::ValidationError(msg),
            SubscriptionError::Notifier(message) => Self::tautulli(message),
            SubscriptionError::Scheduler(msg) | SubscriptionError::Internal(msg) => {
                Self::InternalError(msg)
            }
            SubscriptionError::Database(msg) => Self::DatabaseError(msg),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound(msg) => Self::NotFound(msg),
            PaymentError::Validation(msg) => Self::ValidationError(msg),
            PaymentError::Gone(msg) => Self::Gone(msg),
            PaymentError::Provider(message) => Self::ExternalApiError {
                service: "Pagamentos".to_string(),
                message,
            },
            PaymentError::Database(msg) => Self::DatabaseError(msg),
            PaymentError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<StatsError> for ApiError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            StatsError::Tautulli(message) => Self::tautulli(message),
            StatsError::Forbidden(msg) => Self::Forbidden(msg),
            StatsError::Database(msg) => Self::DatabaseError(msg),
            StatsError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<SystemError> for ApiError {
    fn from(err: SystemError) -> Self {
        match err {
            SystemError::Validation(msg) => Self::ValidationError(msg),
            SystemError::Connection(message) => Self::plex(message),
            SystemError::Database(msg) => Self::DatabaseError(msg),
            SystemError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("Acesso negado. Requer permissão de administrador.".to_string())
    }

    pub fn plex(message: impl Into<String>) -> Self {
        Self::ExternalApiError {
            service: "Plex".to_string(),
            message: message.into(),
        }
    }

    pub fn tautulli(message: impl Into<String>) -> Self {
        Self::ExternalApiError {
            service: "Tautulli".to_string(),
            message: message.into(),
        }
    }
}
