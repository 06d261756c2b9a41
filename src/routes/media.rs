use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Url;

use crate::app_state::AppState;
use crate::models::submission::{ErrorResponse, MediaErrorResponse, MediaQuery};
use crate::services::media::MediaError;

/// GET /api/v1/media?url= — Retrieve a produced file through the relay.
///
/// Only URLs under a configured backend's view endpoint are fetched.
pub async fn fetch_media(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Response {
    let Ok(url) = Url::parse(&query.url) else {
        return bad_request("url is not valid");
    };
    if !is_backend_file(&state, &url) {
        return bad_request("url does not point at a configured backend");
    }

    match state.media.fetch(url.as_str()).await {
        Ok(body) => {
            let content_type = body
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body.bytes).into_response()
        }
        Err(err @ MediaError::InFlight(_)) => (
            StatusCode::CONFLICT,
            Json(MediaErrorResponse {
                class: None,
                retryable: true,
                attempts: 0,
                message: err.to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            let class = err.class();
            (
                StatusCode::BAD_GATEWAY,
                Json(MediaErrorResponse {
                    class,
                    retryable: class.is_some_and(|c| c.is_transient()),
                    attempts: err.attempts(),
                    message: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn is_backend_file(state: &AppState, url: &Url) -> bool {
    state
        .engine
        .backends()
        .unique()
        .iter()
        .filter_map(|backend| backend.view_endpoint().cloned())
        .any(|view| view.origin() == url.origin() && view.path() == url.path())
}

fn bad_request(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}
