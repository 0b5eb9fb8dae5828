//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use super::kind::ErrorKind;
use http::StatusCode;

impl ErrorKind {
    /// HTTP status code for this kind
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::None => StatusCode::OK,
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Permission => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::NotEligible => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Dependency => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Fatal | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode {
    /// HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        self.kind().http_status()
    }
}
