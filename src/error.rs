use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FavoritesError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("user {user_id} already favorited {content_type_id}:{object_id}")]
    UniqueConstraintViolation {
        user_id: i64,
        content_type_id: i64,
        object_id: String,
    },
    #[error("authentication required")]
    Unauthorized,
    #[error("{0} still exists")]
    StillExists(&'static str),
    #[error("ValidationError: {0}")]
    Validation(String),
    #[error("DatabaseError: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl From<libsql::Error> for FavoritesError {
    fn from(error: libsql::Error) -> Self {
        FavoritesError::Database(error.into())
    }
}

impl FavoritesError {
    pub fn status(&self) -> StatusCode {
        use FavoritesError::*;
        match self {
            NotFound(_) => StatusCode::NOT_FOUND,
            MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            UniqueConstraintViolation { .. } => StatusCode::CONFLICT,
            Unauthorized => StatusCode::UNAUTHORIZED,
            StillExists(_) => StatusCode::CONFLICT,
            Validation(_) => StatusCode::BAD_REQUEST,
            Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for FavoritesError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            FavoritesError::Database(e) => {
                tracing::error!(error = %format!("{e:#}"), "database error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub type FavoritesResult<T> = Result<T, FavoritesError>;
