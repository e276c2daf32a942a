//! Error responses.
//!
//! Every failure leaves the service as `{"detail": ...}`. `detail` is a string,
//! except for query validation where it lists `{field, message}` objects.

use axum::extract::rejection::QueryRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use datalayer_core::{AuthError, DataAccessError, TransportError, ValidationError};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: Value,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Construction stops at the first failed check, so there is one.
    #[error("invalid query: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Data(#[from] DataAccessError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(ValidationError {
            field: "query",
            message: rejection.body_text(),
        })
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Data(e) => data_status(e),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn data_status(e: &DataAccessError) -> StatusCode {
    match e {
        DataAccessError::DatasetNotFound { .. }
        | DataAccessError::NoFiles { .. }
        | DataAccessError::MissingColumn { .. } => StatusCode::BAD_REQUEST,
        DataAccessError::Download {
            source: TransportError::Timeout { .. },
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        DataAccessError::Download { .. } => StatusCode::BAD_GATEWAY,
        DataAccessError::Cache(_) | DataAccessError::Frame(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_error(status: StatusCode, detail: Value) -> Response {
    (status, Json(ErrorResponse { detail })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Auth(e @ (AuthError::MissingCredentials | AuthError::InvalidToken)) => {
                let mut resp = json_error(status, json!(e.to_string()));
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                resp
            }
            Self::Auth(_) => json_error(status, json!("Auth token unavailable")),
            Self::Validation(e) => json_error(status, json!([e])),
            Self::Data(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %e, "data access failed");
                json_error(status, json!("Internal server error"))
            }
            Self::Data(e) => json_error(status, json!(e.to_string())),
            Self::Internal(message) => {
                error!(error = %message, "request failed");
                json_error(status, json!("Internal server error"))
            }
        }
    }
}
