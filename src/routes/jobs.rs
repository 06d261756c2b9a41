use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{CostParameters, JobId, JobKind};
use crate::models::submission::{
    CancelResponse, ErrorResponse, JobStatusResponse, SubmitRequest, SubmitResponse,
};
use crate::services::coordinator::SubmitError;

/// POST /api/v1/jobs — Submit a generation or analysis job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    if let Err(report) = request.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, report.to_string());
    }
    submit(&state, request).await
}

/// POST /api/v1/analyze — Upload an image for image-to-prompt analysis.
pub async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, StatusCode> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut instructions: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                filename = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                image_data = Some(data.to_vec());
            }
            Some("instructions") => {
                instructions = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            _ => {}
        }
    }

    let image_data = image_data.ok_or(StatusCode::BAD_REQUEST)?;
    let format =
        image::guess_format(&image_data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

    let label = filename.unwrap_or_else(|| "upload".to_string());
    let payload = serde_json::json!({
        "image": base64::engine::general_purpose::STANDARD.encode(&image_data),
        "mime_type": format.to_mime_type(),
        "filename": label,
        "instructions": instructions,
    });

    let request = SubmitRequest {
        kind: JobKind::PromptAnalysis,
        label,
        payload,
        cost: CostParameters::default(),
    };
    Ok(submit(&state, request).await)
}

/// GET /api/v1/jobs/{job_id} — Pending state or final result of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let id = JobId::from(job_id);

    if let Some(snapshot) = state.engine.pending(&id) {
        return Ok(Json(JobStatusResponse::pending(snapshot)));
    }

    state
        .results
        .get(&id)
        .map(|result| Json(JobStatusResponse::finished(result)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// DELETE /api/v1/jobs/{job_id} — Cancel a pending job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<CancelResponse> {
    let id = JobId::from(job_id);
    let cancelled = state.engine.cancel(&id);
    Json(CancelResponse {
        job_id: id,
        cancelled,
    })
}

async fn submit(state: &AppState, request: SubmitRequest) -> Response {
    match state.engine.submit(request).await {
        Ok(handle) => {
            let response = SubmitResponse {
                job_id: handle.id,
                status: "pending".to_string(),
                timeout_secs: handle.timeout.as_secs(),
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        }
        Err(err @ SubmitError::Validation(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(err @ SubmitError::NoBackend(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Err(err) => match err.rejection() {
            Some(result) => {
                state.results.insert(result.clone());
                (StatusCode::BAD_GATEWAY, Json(result)).into_response()
            }
            None => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        },
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}
