use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Missing or invalid authorization header")]
    NotAuthenticated,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("You don't have permission to access this resource")]
    NotAuthorized,

    // User errors
    #[error("User not found")]
    UserNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Cannot create user account for another user")]
    ForeignAccount,

    // Listing errors
    #[error("Listing not found")]
    ListingNotFound,

    #[error("You don't own this listing")]
    NotListingOwner,

    // Image errors
    #[error("Image not found")]
    ImageNotFound,

    #[error("Failed to upload images")]
    UploadFailed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Signing error: {0}")]
    Signing(String),

    // Routing
    #[error("Not Found")]
    RouteNotFound,

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    // Invalid input
    #[error("{0}")]
    InvalidInput(String),

    // Field validation
    #[error("{0}")]
    Validation(String),
}

impl AppError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidInput(message.into())
    }

    pub fn validation(field: &str, reason: impl std::fmt::Display) -> Self {
        AppError::Validation(format!("{}: {}", field, reason))
    }

    /// True when the database rejected a row on a unique constraint
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            AppError::Database(sqlx::Error::Database(e)) if e.is_unique_violation()
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            // 401 Unauthorized
            AppError::NotAuthenticated | AppError::InvalidToken(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }

            // 403 Forbidden
            AppError::NotAuthorized | AppError::NotListingOwner | AppError::ForeignAccount => {
                (StatusCode::FORBIDDEN, self.to_string())
            }

            // 404 Not Found
            AppError::UserNotFound
            | AppError::ListingNotFound
            | AppError::ImageNotFound
            | AppError::RouteNotFound => (StatusCode::NOT_FOUND, self.to_string()),

            // 409 Conflict
            AppError::UserAlreadyExists => (StatusCode::CONFLICT, self.to_string()),

            // 422 Unprocessable Entity
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),

            // 500 Internal Server Error
            AppError::UploadFailed => {
                tracing::error!("Internal error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Signing(_)
            | AppError::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
