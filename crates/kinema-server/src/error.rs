//! Transport error mapping.
//!
//! Both front ends share one taxonomy from `kinema_core`; this module
//! is the only place where it is translated to HTTP status codes and
//! RPC status codes, so no engine error ever crosses a transport
//! boundary unmapped.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use kinema_core::Error as CoreError;

/// Suggested client retry delay while the model is loading.
const RETRY_AFTER_SECS: u32 = 60;

/// HTTP API error.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = if self.status == StatusCode::SERVICE_UNAVAILABLE {
            json!({
                "error": self.message,
                "retry_after_secs": RETRY_AFTER_SECS,
            })
        } else {
            json!({ "error": self.message })
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::NotReady { elapsed_secs } => {
                ApiError::unavailable(still_loading_message(*elapsed_secs))
            }
            CoreError::InvalidImage(_) | CoreError::InvalidParameter(_) => {
                ApiError::bad_request(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

/// Map an engine error to an RPC status.
pub fn into_status(err: CoreError) -> tonic::Status {
    match &err {
        CoreError::NotReady { elapsed_secs } => {
            tonic::Status::unavailable(still_loading_message(*elapsed_secs))
        }
        CoreError::InvalidImage(_) | CoreError::InvalidParameter(_) => {
            tonic::Status::invalid_argument(err.to_string())
        }
        _ => tonic::Status::internal(err.to_string()),
    }
}

fn still_loading_message(elapsed_secs: f64) -> String {
    format!(
        "Model is still loading ({:.1} minutes elapsed), please retry later",
        elapsed_secs / 60.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_maps_to_503_with_elapsed_minutes() {
        let err = ApiError::from(CoreError::NotReady { elapsed_secs: 90.0 });
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message.contains("still loading"));
        assert!(err.message.contains("1.5 minutes"));
    }

    #[test]
    fn client_input_errors_map_to_400() {
        let err = ApiError::from(CoreError::InvalidImage("bad png".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(CoreError::InvalidParameter("fps must be positive".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("fps must be positive"));
    }

    #[test]
    fn inference_failures_map_to_500() {
        let err = ApiError::from(CoreError::Inference("oom".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rpc_status_codes_follow_the_same_taxonomy() {
        assert_eq!(
            into_status(CoreError::NotReady { elapsed_secs: 5.0 }).code(),
            tonic::Code::Unavailable
        );
        assert_eq!(
            into_status(CoreError::InvalidImage("bad".into())).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            into_status(CoreError::InvalidParameter("bad".into())).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            into_status(CoreError::Inference("oom".into())).code(),
            tonic::Code::Internal
        );
    }
}
