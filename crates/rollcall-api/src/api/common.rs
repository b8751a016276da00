// Shared API plumbing: error body, error mapping, caller identity

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rollcall_core::AdmissionError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the id of the user making the request
pub const USER_ID_HEADER: &str = "x-user-id";

/// Seconds a client should wait before retrying a contended request
const RETRY_AFTER_SECS: &str = "1";

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,

    /// Whether the same request may succeed if retried.
    #[serde(default)]
    pub retryable: bool,
}

/// Everything a handler can fail with
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Admission(err) => match err {
                AdmissionError::EventNotFound(_) | AdmissionError::NotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                AdmissionError::Duplicate { .. } => StatusCode::CONFLICT,
                AdmissionError::PastEvent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                AdmissionError::Contended { .. } | AdmissionError::Unavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                AdmissionError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Admission(err) if err.is_retryable())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = self.is_retryable();

        if status.is_server_error() && !retryable {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!(%status, "Request rejected: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            retryable,
        });

        let mut response = (status, body).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

/// Caller identity taken from the `x-user-id` header
///
/// Authentication happens upstream; this service trusts the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;

        value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))
    }
}
