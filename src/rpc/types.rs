use crate::api::ApiError;
use crate::error::ArenaError;
use serde::{Deserialize, Serialize};

/// Body of every non-2xx response. `detail` carries the protocol error so
/// clients can match on it; it is absent for transport-level failures.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ArenaError>,
}

impl From<ApiError> for ErrorResponse {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Arena(detail) => Self { error: detail.to_string(), detail: Some(detail) },
            ApiError::Transport(error) => Self { error, detail: None },
        }
    }
}

impl From<ErrorResponse> for ApiError {
    fn from(e: ErrorResponse) -> Self {
        match e.detail {
            Some(detail) => ApiError::Arena(detail),
            None => ApiError::Transport(e.error),
        }
    }
}
