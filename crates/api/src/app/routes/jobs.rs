use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use wikiforge_queue::{JobFilter, JobId, JobStatus};

use crate::app::SweepSettings;
use crate::app::services::SharedJobStore;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_jobs).get(list_jobs))
        .route("/claim", post(claim_job))
        .route("/stats", get(stats))
        .route("/sweep", post(sweep))
        .route("/:id", get(get_job))
        .route("/:id/start", post(start_job))
        .route("/:id/complete", post(complete_job))
        .route("/:id/fail", post(fail_job))
        .route("/:id/cancel", post(cancel_job))
}

/// `POST /jobs`: create one job (object body) or a batch (array body).
pub async fn create_jobs(
    Extension(store): Extension<SharedJobStore>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    if body.is_array() {
        let requests: Vec<dto::CreateJobRequest> = match serde_json::from_value(body) {
            Ok(v) => v,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
            }
        };
        if requests.is_empty() {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "batch must contain at least one job",
            );
        }

        let specs = requests
            .into_iter()
            .map(dto::CreateJobRequest::into_spec)
            .collect();
        match store.create_batch(specs).await {
            Ok(jobs) => {
                (StatusCode::CREATED, Json(serde_json::json!({ "entries": jobs }))).into_response()
            }
            Err(e) => errors::store_error_to_response(e),
        }
    } else {
        let request: dto::CreateJobRequest = match serde_json::from_value(body) {
            Ok(v) => v,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
            }
        };
        match store.create(request.into_spec()).await {
            Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
            Err(e) => errors::store_error_to_response(e),
        }
    }
}

/// `GET /jobs?status=&limit=&offset=`
pub async fn list_jobs(
    Extension(store): Extension<SharedJobStore>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => match JobStatus::parse(s) {
            Some(parsed) => Some(parsed),
            None => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_status",
                    format!("unknown status '{s}'"),
                );
            }
        },
    };

    let filter = JobFilter {
        status,
        limit: query.limit,
        offset: query.offset.unwrap_or(0),
    };
    match store.list(filter).await {
        Ok(page) => (
            StatusCode::OK,
            Json(serde_json::json!({ "entries": page.entries, "total": page.total })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/claim`: atomically hand the best pending job to a worker.
pub async fn claim_job(
    Extension(store): Extension<SharedJobStore>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let request: dto::ClaimRequest = match serde_json::from_value(body) {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
        }
    };

    let worker_id = match request.worker_id.as_deref().map(str::trim) {
        Some(w) if !w.is_empty() => w.to_string(),
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "workerId is required",
            );
        }
    };

    match store.claim(&worker_id, request.job_type.as_deref()).await {
        // `job` is null when nothing is eligible.
        Ok(job) => (StatusCode::OK, Json(serde_json::json!({ "job": job }))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `GET /jobs/:id`
pub async fn get_job(
    Extension(store): Extension<SharedJobStore>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };
    match store.get(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/:id/start`: `claimed -> running`.
pub async fn start_job(
    Extension(store): Extension<SharedJobStore>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };
    match store.start(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::no_matching_job(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/:id/complete`: `running -> completed`, body `{result?}`.
pub async fn complete_job(
    Extension(store): Extension<SharedJobStore>,
    Path(id): Path<String>,
    body: Option<Json<dto::CompleteRequest>>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };
    let result = body.and_then(|Json(b)| b.result);
    match store.complete(id, result).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::no_matching_job(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/:id/fail`: report a failed attempt, body `{error}`.
pub async fn fail_job(
    Extension(store): Extension<SharedJobStore>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    let request: dto::FailRequest = match serde_json::from_value(body) {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
        }
    };
    let error = match request.error.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => e.to_string(),
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "error is required",
            );
        }
    };

    match store.fail(id, &error).await {
        Ok(Some(outcome)) => {
            (StatusCode::OK, Json(dto::fail_outcome_to_json(&outcome))).into_response()
        }
        Ok(None) => errors::no_matching_job(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/:id/cancel`: only `pending`/`claimed` jobs can be cancelled.
pub async fn cancel_job(
    Extension(store): Extension<SharedJobStore>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };
    match store.cancel(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::no_matching_job(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `GET /jobs/stats`
pub async fn stats(Extension(store): Extension<SharedJobStore>) -> axum::response::Response {
    match store.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/sweep`: reclaim jobs abandoned past the staleness threshold.
pub async fn sweep(
    Extension(store): Extension<SharedJobStore>,
    Extension(settings): Extension<SweepSettings>,
) -> axum::response::Response {
    match store.sweep(settings.stale_after).await {
        Ok(swept) => (
            StatusCode::OK,
            Json(serde_json::json!({ "swept": swept.len(), "entries": swept })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
