//! API error type and its HTTP mapping.

use crate::aggregate::WindowError;
use crate::db::DbError;
use crate::scheduler::SchedulerError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Window(#[from] WindowError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Db(DbError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Scheduler(SchedulerError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Scheduler(SchedulerError::RoundInProgress) => StatusCode::CONFLICT,
            ApiError::Scheduler(SchedulerError::InvalidInterval) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(SchedulerError::Round(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Window(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
