use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if let Some(code) = err.find::<ApiErrorCode>() {
        (code.clone(), code.to_string())
    } else if err.is_not_found() {
        (ApiErrorCode::NotFound, ApiErrorCode::NotFound.to_string())
    } else if let Some(e) = err.find::<reject::MissingHeader>() {
        (ApiErrorCode::InvalidToken, e.to_string())
    } else if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        (ApiErrorCode::BadRequest, e.to_string())
    } else if let Some(e) = err.find::<reject::LengthRequired>() {
        (ApiErrorCode::BadRequest, e.to_string())
    } else if let Some(e) = err.find::<reject::PayloadTooLarge>() {
        (ApiErrorCode::BadRequest, e.to_string())
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        (ApiErrorCode::NotFound, "Method not allowed".to_string())
    } else {
        (
            ApiErrorCode::InternalError,
            format!("Unhandled error: {:?}", err),
        )
    };

    let status = code.status();
    let json = warp::reply::json(&ApiResponse::<()>::err(code, message));
    Ok(warp::reply::with_status(json, status))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ApiErrorCode {
    #[error("Token is not valid")]
    InvalidToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token has been revoked")]
    TokenRevoked,
    #[error("Wrong token kind for this operation")]
    WrongTokenKind,
    #[error("User not found")]
    UserNotFound,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Token is already revoked")]
    AlreadyRevoked,
    #[error("Malformed request")]
    BadRequest,
    #[error("Not found")]
    NotFound,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidToken
            | ApiErrorCode::TokenExpired
            | ApiErrorCode::TokenRevoked
            | ApiErrorCode::WrongTokenKind
            | ApiErrorCode::UserNotFound => StatusCode::UNAUTHORIZED,
            ApiErrorCode::SessionNotFound | ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::AlreadyRevoked => StatusCode::CONFLICT,
            ApiErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<AuthError> for ApiErrorCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::TokenInvalid => ApiErrorCode::InvalidToken,
            AuthError::TokenExpired => ApiErrorCode::TokenExpired,
            AuthError::TokenRevoked => ApiErrorCode::TokenRevoked,
            AuthError::WrongTokenKind => ApiErrorCode::WrongTokenKind,
            AuthError::UserNotFound => ApiErrorCode::UserNotFound,
            AuthError::SessionNotFound => ApiErrorCode::SessionNotFound,
            AuthError::Store(e) => ApiErrorCode::internal(e),
            AuthError::InternalError(e) => ApiErrorCode::internal(e),
        }
    }
}

impl From<SessionError> for ApiErrorCode {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NotFound => ApiErrorCode::SessionNotFound,
            SessionError::AlreadyExpired => ApiErrorCode::TokenExpired,
            SessionError::AlreadyRevoked => ApiErrorCode::AlreadyRevoked,
            SessionError::Serialization(e) => ApiErrorCode::internal(e),
            SessionError::Store(e) => ApiErrorCode::internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_server_errors() {
        let code = ApiErrorCode::from(AuthError::Store("redis down".into()));
        assert_eq!(code, ApiErrorCode::InternalError);
        assert_eq!(code.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn token_problems_are_unauthorized() {
        for err in [
            AuthError::TokenInvalid,
            AuthError::TokenExpired,
            AuthError::TokenRevoked,
            AuthError::WrongTokenKind,
        ] {
            assert_eq!(ApiErrorCode::from(err).status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn missing_session_is_not_found() {
        let code = ApiErrorCode::from(SessionError::NotFound);
        assert_eq!(code.status(), StatusCode::NOT_FOUND);
    }
}
