use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::entity::EntityError;
use db::validators::ValidationError;
use services::auth::AuthError;
use services::mutation::MutationError;
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

impl From<EntityError> for ApiError {
    fn from(err: EntityError) -> Self {
        match err {
            EntityError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            EntityError::NotFound => ApiError::NotFound("record not found".to_string()),
            EntityError::Conflict(msg) => ApiError::Conflict(msg),
            EntityError::Database(err) => ApiError::Database(err),
            EntityError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<MutationError> for ApiError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            MutationError::Conflict(msg) => ApiError::Conflict(msg),
            MutationError::NotFound => ApiError::NotFound("entity not found".to_string()),
            MutationError::Entity(err) => err.into(),
            MutationError::Database(err) => ApiError::Database(err),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.0)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            // Unique violations surface as 400 with the driver message.
            ApiError::BadRequest(_) | ApiError::Conflict(_) | ApiError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ApiResponse::error(status.as_u16(), self.to_string());
        (status, Json(body)).into_response()
    }
}
