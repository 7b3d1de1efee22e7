#![allow(non_snake_case)]

use crate::Uri;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;

use crate::credentials::CredentialError;

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
    NotFound { message: String },
    InvalidPayload { message: String },
    MissingCredentials { message: String },
    AuthenticationFailure { message: String },
    StudentDoesNotExist { message: String },
    StudentAlreadyExists { message: String },
    AdminAlreadyExists { message: String },
    EventDoesNotExist { message: String },
    AlreadyCheckedIn { message: String },
    NotCheckedIn { message: String },
    InternalError { kind: &'static str, message: String },
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. }
            | Error::StudentDoesNotExist { .. }
            | Error::EventDoesNotExist { .. } => StatusCode::NOT_FOUND,
            Error::InvalidPayload { .. }
            | Error::MissingCredentials { .. }
            | Error::StudentAlreadyExists { .. }
            | Error::AdminAlreadyExists { .. }
            | Error::AlreadyCheckedIn { .. }
            | Error::NotCheckedIn { .. } => StatusCode::BAD_REQUEST,
            Error::AuthenticationFailure { .. } => StatusCode::UNAUTHORIZED,
            Error::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
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

impl From<CredentialError> for Error {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Encryption(message) => Self::InternalError {
                kind: "EncryptionError",
                message,
            },
            CredentialError::Decryption(message) => Self::InternalError {
                kind: "DecryptionError",
                message,
            },
        }
    }
}
