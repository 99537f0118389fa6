use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Envelope for the JSON endpoints.
///
/// Business-rule failures travel as HTTP 200 with `success: false` and a
/// `note`; unset fields are omitted from the body entirely, so a clean
/// success never carries a `note` key.
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response carrying data.
    pub fn ok(value: T) -> Self {
        ApiResponse {
            success: true,
            note: None,
            value: Some(value),
        }
    }

    /// Creates a successful response with a status note and no data.
    pub fn success(note: impl Into<String>) -> Self {
        ApiResponse {
            success: true,
            note: Some(note.into()),
            value: None,
        }
    }

    /// Creates a business-rule failure.
    pub fn failure(note: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            note: Some(note.into()),
            value: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
