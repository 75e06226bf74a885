//! API errors and their JSON responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rssx_federation::FederationError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{reason}")]
    Unauthorized { reason: String },

    #[error("{reason}")]
    BadRequest { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("{source}")]
    Federation { source: FederationError },
}

impl ApiError {
    pub fn unauthorized(reason: &str) -> Self {
        ApiError::Unauthorized {
            reason: reason.to_string(),
        }
    }

    pub fn bad_request(reason: &str) -> Self {
        ApiError::BadRequest {
            reason: reason.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Federation { source } => StatusCode::from_u16(source.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl From<FederationError> for ApiError {
    fn from(source: FederationError) -> Self {
        ApiError::Federation { source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self);
        } else {
            info!(status = status.as_u16(), "Request rejected: {}", self);
        }

        let body = match &self {
            ApiError::Federation {
                source:
                    FederationError::AuthorityRelay {
                        origin,
                        status: origin_status,
                        message,
                    },
            } => json!({
                "error": message,
                "origin": origin,
                "origin_status": origin_status,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
