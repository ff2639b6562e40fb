//! Run lifecycle endpoints.
//!
//! POST /api/crawl starts a run in the background and answers with its
//! session id; DELETE /api/runs/:session_id requests cancellation.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tagcheck_core::{CrawlBounds, RunRequest};

use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct StartCrawlRequest {
    pub url: String,
    pub validators: Option<Vec<String>>,
    pub max_pages: Option<usize>,
    pub max_depth: Option<usize>,
    pub settle_delay: Option<f64>,
}

impl StartCrawlRequest {
    fn bounds(&self, defaults: CrawlBounds) -> CrawlBounds {
        CrawlBounds {
            max_pages: self.max_pages.unwrap_or(defaults.max_pages),
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            settle_delay_secs: self.settle_delay.unwrap_or(defaults.settle_delay_secs),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartCrawlResponse {
    status: String,
    session_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Start a crawl-and-validate run.
///
/// Configuration errors (unknown validator, bad bounds) are reported here
/// and no session is created. Everything later is reported on the
/// session's event stream.
pub async fn start_crawl_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<StartCrawlRequest>,
) -> Result<(StatusCode, Json<StartCrawlResponse>), ApiError> {
    if body.url.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "url must not be empty"));
    }

    let mut request =
        RunRequest::new(body.url.clone()).with_bounds(body.bounds(state.default_bounds));
    if let Some(ids) = body.validators {
        request = request.with_validators(ids);
    }

    let prepared = state.controller.prepare(request).await.map_err(|err| {
        tracing::warn!(error = %err, url = %body.url, "Rejected crawl request");
        api_error(StatusCode::BAD_REQUEST, err.to_string())
    })?;

    let session_id = prepared.session_id().to_string();
    state
        .hub
        .register(
            &session_id,
            prepared.bus().clone(),
            prepared.cancellation_token(),
        )
        .await;

    let controller = state.controller.clone();
    tokio::spawn(async move {
        let session_id = prepared.session_id().to_string();
        match controller.execute(prepared).await {
            Ok(summary) => tracing::info!(
                session_id = %session_id,
                passed = summary.passed,
                total = summary.total,
                "Run finished"
            ),
            Err(e) => tracing::error!(session_id = %session_id, error = %e, "Run ended with error"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartCrawlResponse {
            status: "started".to_string(),
            message: format!("Crawl started for {}", body.url),
            session_id,
        }),
    ))
}

/// Request cancellation of a running session.
pub async fn cancel_run_handler(
    Extension(state): Extension<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.hub.cancel(&session_id).await {
        tracing::info!(session_id = %session_id, "Cancellation requested");
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("unknown session: {}", session_id),
        ))
    }
}
