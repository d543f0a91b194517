use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection, StringRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;

#[derive(Error, Debug)]
pub enum PortalError {
    /// Bad credentials. Deliberately carries no detail about which part was wrong.
    #[error("login failed")]
    Authentication,

    /// No valid session accompanied the request.
    #[error("login required")]
    Unauthenticated,

    #[error("not allowed: {0}")]
    Authorization(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(DieselError),

    #[error("could not connect to database: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<DieselError> for PortalError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                PortalError::Validation(format!("duplicate record: {}", info.message()))
            }
            DieselError::NotFound => PortalError::NotFound("record".to_string()),
            other => PortalError::Database(other),
        }
    }
}

// Malformed requests are reported like any other invalid input.
impl From<JsonRejection> for PortalError {
    fn from(rejection: JsonRejection) -> Self {
        PortalError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for PortalError {
    fn from(rejection: PathRejection) -> Self {
        PortalError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for PortalError {
    fn from(rejection: QueryRejection) -> Self {
        PortalError::Validation(rejection.body_text())
    }
}

impl From<StringRejection> for PortalError {
    fn from(rejection: StringRejection) -> Self {
        PortalError::Validation(rejection.body_text())
    }
}

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::Authentication | PortalError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PortalError::Authorization(_) => StatusCode::FORBIDDEN,
            PortalError::Validation(_) | PortalError::Csv(_) => StatusCode::BAD_REQUEST,
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::Unavailable(_) | PortalError::Connection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PortalError::Database(_)
            | PortalError::Io(_)
            | PortalError::PasswordHash(_)
            | PortalError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable category used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::Authentication | PortalError::Unauthenticated => "authentication",
            PortalError::Authorization(_) => "authorization",
            PortalError::Validation(_) | PortalError::Csv(_) => "validation",
            PortalError::NotFound(_) => "not_found",
            PortalError::Unavailable(_) | PortalError::Connection(_) => "unavailable",
            PortalError::Database(_)
            | PortalError::Io(_)
            | PortalError::PasswordHash(_)
            | PortalError::Task(_) => "internal",
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_message_is_generic() {
        assert_eq!(PortalError::Authentication.to_string(), "login failed");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PortalError::Authentication.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PortalError::Authorization("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            PortalError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PortalError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PortalError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: PortalError = DieselError::NotFound.into();
        assert!(matches!(err, PortalError::NotFound(_)));
    }
}
