use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// One rejected request field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldError>,
}

/// Errors returned to API callers. Internal causes are logged, never rendered.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request")]
    Validation(Vec<FieldError>),

    #[error("Not found")]
    NotFound,

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self::Internal(error.to_string())
    }
}

pub fn field_errors(report: &garde::Report) -> Vec<FieldError> {
    report
        .iter()
        .map(|(path, error)| FieldError::new(camel_case(&path.to_string()), error.message()))
        .collect()
}

/// Report field names the way they appear in request bodies.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "invalid request",
                    details,
                },
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not found",
                    details: Vec::new(),
                },
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    error: "too many requests, try again later",
                    details: Vec::new(),
                },
            ),
            ApiError::Internal(cause) => {
                tracing::error!(error = %cause, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal server error",
                        details: Vec::new(),
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

    #[test]
    fn test_camel_case_field_names() {
        assert_eq!(camel_case("manifest_url"), "manifestUrl");
        assert_eq!(camel_case("url"), "url");
        assert_eq!(camel_case("workspace_path"), "workspacePath");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation(vec![]).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::internal("db down").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
