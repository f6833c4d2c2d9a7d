use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use funnel_core::error::{self, ApiError};

use crate::deals::DealError;
use crate::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Missing, malformed or unverifiable launch credential (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        docs_hint: Option<String>,
    },
    /// Deal absent or owned by someone else (404)
    NotFound { resource: String },
    /// Deal creation inside the cooldown window (429)
    RateLimited { retry_after: Duration },
    /// Storage error (500)
    Storage(StoreError),
}

impl AppError {
    pub fn missing_field(field: &str) -> Self {
        AppError::Validation {
            message: format!("Field '{field}' is required and must not be empty"),
            field: Some(field.to_string()),
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let mut retry_after = None;

        let (status, api_error) = match self {
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Validation {
                message,
                field,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::RateLimited { retry_after: wait } => {
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                retry_after = Some(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ApiError {
                        error: error::codes::RATE_LIMITED.to_string(),
                        message: format!(
                            "Only one deal can be created per minute. Retry after {secs} seconds."
                        ),
                        field: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Storage(err) => {
                tracing::error!("Storage error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, internal_error(request_id))
            }
        };

        let mut response = (status, Json(api_error)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn internal_error(request_id: String) -> ApiError {
    ApiError {
        error: error::codes::INTERNAL_ERROR.to_string(),
        message: "An internal error occurred".to_string(),
        field: None,
        request_id,
        docs_hint: None,
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Storage(err)
    }
}

impl From<DealError> for AppError {
    fn from(err: DealError) -> Self {
        match err {
            DealError::Validation { field } => AppError::missing_field(field),
            DealError::DealNotFound(id) => AppError::NotFound {
                resource: format!("Deal {id}"),
            },
            DealError::ItemNotFound { deal_id, text } => AppError::NotFound {
                resource: format!("Checklist item '{text}' on deal {deal_id}"),
            },
            DealError::RateLimited { retry_after } => AppError::RateLimited { retry_after },
            DealError::Storage(err) => AppError::Storage(err),
        }
    }
}
