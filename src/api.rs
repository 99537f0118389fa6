use crate::errors::AppError;
use axum::response::Response;

pub mod assignment;
pub mod collection;
pub mod feedback;
pub mod history;
pub mod submission;

mod helper;

/// Routes that exist but do not offer this verb.
pub async fn not_implemented() -> Result<Response, AppError> {
    Err(AppError::NotImplemented)
}

/// Catch-all for paths outside the exchange surface.
pub async fn unknown_route() -> Result<Response, AppError> {
    Err(AppError::NotFound(
        "Could not find requested resource".to_string(),
    ))
}
