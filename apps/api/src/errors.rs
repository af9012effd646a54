use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: cannot apply '{event}' to {entity} in state '{state}'")]
    InvalidTransition {
        entity: String,
        state: String,
        event: String,
    },

    #[error("Already dispatched: {0}")]
    AlreadyDispatched(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Not ready: job {job_id} is {state}")]
    NotReady { job_id: String, state: String },

    #[error("Upstream error (transient): {0}")]
    TransientUpstream(String),

    #[error("Upstream error (permanent): {0}")]
    PermanentUpstream(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InvalidTransition { .. } => {
                tracing::warn!("{self}");
                (StatusCode::CONFLICT, "INVALID_TRANSITION", self.to_string())
            }
            AppError::AlreadyDispatched(msg) => {
                (StatusCode::CONFLICT, "ALREADY_DISPATCHED", msg.clone())
            }
            AppError::InsufficientData(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_DATA",
                msg.clone(),
            ),
            AppError::NotReady { .. } => (StatusCode::ACCEPTED, "NOT_READY", self.to_string()),
            AppError::PermanentUpstream(msg) => {
                tracing::warn!("Permanent upstream error: {msg}");
                (StatusCode::BAD_REQUEST, "UPSTREAM_REJECTED", msg.clone())
            }
            AppError::TransientUpstream(msg) => {
                tracing::error!("Transient upstream error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_UNAVAILABLE",
                    "An upstream service is unavailable".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "QUEUE_ERROR",
                    "A queue error occurred".to_string(),
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl AppError {
    pub fn invalid_transition(
        entity: impl Into<String>,
        state: impl std::fmt::Display,
        event: impl std::fmt::Display,
    ) -> Self {
        AppError::InvalidTransition {
            entity: entity.into(),
            state: state.to_string(),
            event: event.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_maps_to_accepted() {
        let err = AppError::NotReady {
            job_id: "abc".to_string(),
            state: "running".to_string(),
        };
        assert_eq!(err.into_response().status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_invalid_transition_maps_to_conflict() {
        let err = AppError::invalid_transition("task B000000001", "pending", "succeed");
        assert!(err.to_string().contains("succeed"));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_insufficient_data_maps_to_unprocessable() {
        let err = AppError::InsufficientData("no snapshot".to_string());
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
