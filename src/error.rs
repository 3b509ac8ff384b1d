use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Failure of an outbound request to QuickBooks, before classification
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Status { status: 401, .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::Status { status: 429, .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// Credential store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential {0} not found")]
    NotFound(i64),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("store worker failed: {0}")]
    Worker(String),
}

/// Errors surfaced to callers of the service and the HTTP layer
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication request failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded after multiple retries")]
    RateLimitExceeded,

    #[error("QuickBooks API error: {message}")]
    Remote { status: u16, message: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidState => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthenticationFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::InvalidState => "invalid_state",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::AuthenticationFailed(_) => "authentication_failed",
            ApiError::RateLimitExceeded => "rate_limit_exceeded",
            ApiError::Remote { .. } => "remote_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Persistence(_) => "persistence_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn no_credential() -> Self {
        ApiError::Unauthenticated("No token found. Authenticate first.".to_string())
    }
}

impl From<RemoteError> for ApiError {
    /// Terminal classification of a remote failure that no retry layer consumed
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Status { status: 401, .. } => {
                ApiError::Unauthenticated("QuickBooks rejected the access token".to_string())
            }
            RemoteError::Status { status: 429, .. } => ApiError::RateLimitExceeded,
            RemoteError::Status { status, body } => ApiError::Remote {
                status,
                message: format!("HTTP {status}: {body}"),
            },
            RemoteError::Transport(msg) => ApiError::ServiceUnavailable(msg),
            RemoteError::Decode(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
