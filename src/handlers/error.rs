use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::fhir::OperationOutcome;
use crate::models::ExchangeError;

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status = match &self {
            ExchangeError::Validation(_) => StatusCode::BAD_REQUEST,
            ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ExchangeError::Conflict(_) => StatusCode::CONFLICT,
            ExchangeError::Unexpected(inner) => {
                tracing::error!(error = %inner, "request failed unexpectedly");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // Server faults keep their details in the log, not the response.
        let message = match &self {
            ExchangeError::Unexpected(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let outcome = OperationOutcome::error(self.issue_code(), message);
        (status, Json(outcome)).into_response()
    }
}
