#![allow(non_snake_case)]

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;

pub async fn handler404(path: Uri) -> (StatusCode, Json<Error>) {
    (
        StatusCode::NOT_FOUND,
        Json(Error::NotFound {
            message: format!("Invalid path: {}", path),
        }),
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Maybe<T> {
    Nothing(Error),
    Fine(Success<T>),
}

pub fn Fine<V>(v: V) -> Maybe<V>
where
    V: Serialize,
{
    Maybe::Fine(Success::of(v))
}

pub fn Nothing<V>(err: Error) -> Maybe<V> {
    Maybe::Nothing(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<T> IntoResponse for Maybe<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self {
            Maybe::Nothing(err) => err.into_response(),
            Maybe::Fine(success) => Json::into_response(Json(success)),
        }
    }
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    InvalidPayload { message: String },
    NotFound { message: String },
    UserDoesNotExist { message: String },
    CourseDoesNotExist { message: String },
    EnrollmentDoesNotExist { message: String },
    UserAlreadyExists { message: String },
    AlreadyEnrolled { message: String },
    AttemptLimitReached { message: String },
    EnrollmentInactive { message: String },
    PaymentRejected { message: String },
    InternalError { kind: &'static str, message: String },
    Unknown { message: String },
}

impl Error {
    pub fn invalid<S: Into<String>>(msg: S) -> Error {
        Error::InvalidPayload {
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. }
            | Error::UserDoesNotExist { .. }
            | Error::CourseDoesNotExist { .. }
            | Error::EnrollmentDoesNotExist { .. } => StatusCode::NOT_FOUND,
            Error::UserAlreadyExists { .. }
            | Error::AlreadyEnrolled { .. }
            | Error::AttemptLimitReached { .. }
            | Error::EnrollmentInactive { .. } => StatusCode::CONFLICT,
            Error::PaymentRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::InternalError { .. } | Error::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::InternalError { kind, message } = &self {
            log::error!("{}: {}", kind, message);
        }
        (self.status(), Json(self)).into_response()
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::InternalError {
            kind: "IOError",
            message: io.to_string(),
        }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres rejected a write on a unique constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    let code = err.as_database_error().and_then(|db| db.code());
    is_unique_code(code.as_deref())
}

fn is_unique_code(code: Option<&str>) -> bool {
    code == Some(UNIQUE_VIOLATION)
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::InternalError {
            kind: "DatabaseError",
            message: err.to_string(),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHashError",
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Unknown {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_map_to_409() {
        let err = Error::AttemptLimitReached {
            message: "no attempts left".to_string(),
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err = Error::AlreadyEnrolled {
            message: "dup".to_string(),
        };
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn error_payload_is_tagged() {
        let value = serde_json::to_value(Error::invalid("`score` out of range")).unwrap();
        assert_eq!(value["error"], "InvalidPayload");
        assert_eq!(value["message"], "`score` out of range");
    }

    #[test]
    fn success_is_flattened() {
        #[derive(Serialize)]
        struct Counted {
            count: u32,
        }
        let value = serde_json::to_value(Fine(Counted { count: 3 })).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn database_errors_are_internal() {
        let err = Error::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn only_sqlstate_23505_is_a_unique_violation() {
        assert!(is_unique_code(Some("23505")));
        assert!(!is_unique_code(Some("23503")));
        assert!(!is_unique_code(None));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
