//! Mapping core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use dsr_core::CoreError;
use serde::Serialize;
use utoipa::ToSchema;

/// JSON body returned with every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `editing_locked`.
    pub error: String,
    pub message: String,
    /// Per-value selection faults, present only for `selection_faults`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub faults: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// No caller identity header on a route that needs one.
    Unauthenticated,
    BadRequest(String),
    /// The release exists but has nothing to serve yet, e.g. no active manifest.
    NotAvailable(&'static str),
    Core(CoreError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidInput(_) | CoreError::Text(_) | CoreError::Uuid(_) => {
            StatusCode::BAD_REQUEST
        }
        CoreError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        CoreError::ReleaseNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::ReleaseExists(_)
        | CoreError::AlreadyActivated(_)
        | CoreError::NotActivated(_)
        | CoreError::EmptyManifest(_)
        | CoreError::EditingLocked(_)
        | CoreError::JobInProgress(_) => StatusCode::CONFLICT,
        CoreError::SelectionFaults(_) | CoreError::UnknownDataset(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "unauthenticated".into(),
                    message: "missing caller identity".into(),
                    faults: None,
                },
            ),
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "bad_request".into(),
                    message,
                    faults: None,
                },
            ),
            Self::NotAvailable(what) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not_available".into(),
                    message: format!("{} is not available", what),
                    faults: None,
                },
            ),
            Self::Core(err) => {
                let status = core_status(&err);
                if status.is_server_error() {
                    tracing::error!(code = err.code(), error = %err, "request failed");
                }
                let faults = match &err {
                    CoreError::SelectionFaults(faults) => serde_json::to_value(faults).ok(),
                    _ => None,
                };
                (
                    status,
                    ErrorBody {
                        error: err.code().into(),
                        message: err.to_string(),
                        faults,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsr_core::{ReleaseKey, SelectionFaults};

    fn key() -> ReleaseKey {
        ReleaseKey::new("R1").unwrap()
    }

    #[test]
    fn state_conflicts_map_to_409() {
        for err in [
            CoreError::AlreadyActivated(key()),
            CoreError::EditingLocked(key()),
            CoreError::JobInProgress(key()),
        ] {
            assert_eq!(core_status(&err), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn faults_and_permissions_keep_their_own_status() {
        let faults = CoreError::SelectionFaults(SelectionFaults::default());
        assert_eq!(core_status(&faults), StatusCode::UNPROCESSABLE_ENTITY);
        let denied = CoreError::PermissionDenied {
            release_key: key(),
            action: "activate",
        };
        assert_eq!(core_status(&denied), StatusCode::FORBIDDEN);
        assert_eq!(
            core_status(&CoreError::ReleaseDisappeared(key())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
