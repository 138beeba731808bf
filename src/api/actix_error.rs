//! Actix Web error adapters for Fleet Guardian errors.
//!
//! Every error leaves the API as JSON carrying the machine-readable kind, so
//! a client can tell a hard block from bad input or a transient failure.

use crate::error::Error;
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
            "code": status_code.as_u16(),
            "blocking": matches!(self, Error::ActiveConnectionsBlockDeletion { .. }),
            "retryable": self.is_retryable(),
        });
        if let Error::ActiveConnectionsBlockDeletion { count, .. } = self {
            body["activeConnections"] = json!(count);
        }
        if let Error::Validation { field, .. } = self {
            body["field"] = json!(field);
        }

        HttpResponse::build(status_code)
            .content_type("application/json")
            .json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::ServerNotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            Error::ConfigParse(_) => StatusCode::BAD_REQUEST,
            Error::ActiveConnectionsBlockDeletion { .. } => StatusCode::CONFLICT,
            Error::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            Error::CredentialsMissing(_) => StatusCode::PRECONDITION_FAILED,
            Error::ProbeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::ProbeConnection(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
