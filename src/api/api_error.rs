// Maps `BotError` onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::core::errors::{BotError, ErrorKind};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug)]
pub struct ApiError(pub BotError);

impl From<BotError> for ApiError {
    fn from(err: BotError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, context = ?self.0.context, "API request failed");
        }
        let body = ErrorBody {
            error: self.0.user_message(),
            code: self.0.code,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BotError::validation("X", "x"), StatusCode::BAD_REQUEST),
            (BotError::not_found("X", "x"), StatusCode::NOT_FOUND),
            (BotError::permission("X", "x"), StatusCode::FORBIDDEN),
            (BotError::database("boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (BotError::vrchat("X", "x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
