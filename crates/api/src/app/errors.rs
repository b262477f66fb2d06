use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use wikiforge_queue::JobStoreError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::Invalid(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        e @ (JobStoreError::EmptyBatch | JobStoreError::BatchTooLarge(_)) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        e @ JobStoreError::Storage { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

/// 404 for transitions whose precondition didn't hold.
///
/// Deliberately indistinguishable from an unknown id: the job may simply
/// have moved to a different state already.
pub fn no_matching_job() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "no matching job")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
