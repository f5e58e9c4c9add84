use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use std::fmt;

use super::types::{ErrorsBody, HttpErrorBody};
use crate::validation::{self, ErrorMap};

#[derive(Debug)]
pub enum ApiError {
    /// No identity could be bound, or the bound identity lacks the required
    /// privilege. Deliberately carries no detail about the cause.
    Unauthorized,

    NotFound,

    /// Field-level validation failures; the map becomes the response body.
    Invalid(ErrorMap),

    InternalError(anyhow::Error),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::NotFound => write!(f, "Not found"),
            Self::Invalid(errors) => write!(f, "Validation failed: {} field(s)", errors.len()),
            Self::InternalError(err) => write!(f, "Internal error: {err}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => http_error(StatusCode::UNAUTHORIZED, "Unauthorized"),
            Self::NotFound => http_error(StatusCode::NOT_FOUND, "Not Found"),
            Self::Invalid(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorsBody { errors }),
            )
                .into_response(),
            Self::InternalError(err) => {
                // Internal detail goes to the log sink, never to the client.
                tracing::error!("Internal error: {err:#}");
                http_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

fn http_error(status: StatusCode, message: &str) -> Response {
    let body = HttpErrorBody {
        code: status.as_u16(),
        message: message.to_string(),
    };
    (status, Json(body)).into_response()
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err)
    }
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        Self::InternalError(err.into())
    }
}

impl From<validation::Error> for ApiError {
    fn from(err: validation::Error) -> Self {
        match err {
            validation::Error::Invalid(errors) => Self::Invalid(errors),
            validation::Error::Db(err) => Self::InternalError(err.into()),
            validation::Error::Internal(err) => Self::InternalError(err),
        }
    }
}
