//! Job submission and lifecycle handlers.

use crate::coordinator::Submission;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde::Serialize;
use stemwell_core::{Fingerprint, JobId, JobStatusResponse, SubmitResponse, is_accepted_content_type};
use tracing::{debug, info};
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub jobs_in_flight: usize,
}

/// Health check endpoint.
///
/// Intentionally unauthenticated for load balancers and probes.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs_in_flight: state.coordinator.in_flight().await,
    })
}

/// Submit audio content for stem separation.
///
/// The raw body is the audio file. Identical content deduplicates onto an
/// in-flight run or an already cached result; all three outcomes return
/// 202 with a job ID to track.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing Content-Type header".to_string()))?;

    if !is_accepted_content_type(content_type) {
        return Err(ApiError::UnsupportedMedia(content_type.to_string()));
    }

    if body.is_empty() {
        return Err(ApiError::Validation("empty upload body".to_string()));
    }

    let max = state.config.server.max_upload_bytes;
    if body.len() as u64 > max {
        return Err(ApiError::PayloadTooLarge(format!(
            "{} bytes exceeds maximum of {max}",
            body.len()
        )));
    }

    let fingerprint = Fingerprint::compute(&body);
    debug!(%fingerprint, size = body.len(), "upload received");

    // Spool the body to disk so a long separation run does not pin the
    // request buffer in memory.
    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let spool = state
        .upload_dir
        .join(format!("{}-{}.upload", fingerprint.to_hex(), Uuid::new_v4()));
    tokio::fs::write(&spool, &body).await?;

    let submission = match state.coordinator.submit(fingerprint, spool.clone()).await {
        Ok(submission) => submission,
        Err(err) => {
            let _ = tokio::fs::remove_file(&spool).await;
            return Err(err);
        }
    };

    let job_id = submission.job_id();
    let snapshot = state.coordinator.status(job_id).await?;
    if matches!(submission, Submission::Started(_)) {
        info!(%job_id, %fingerprint, "separation job accepted");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            state: snapshot.state,
        }),
    ))
}

/// Get the status of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::parse(&job_id)?;
    let snapshot = state.coordinator.status(job_id).await?;
    Ok(Json(JobStatusResponse {
        job_id: snapshot.job_id,
        state: snapshot.state,
        artifacts: snapshot.artifacts,
        error: snapshot.error,
        started_at: snapshot.started_at,
    }))
}

/// Request cancellation of a job.
///
/// Cancellation is cooperative: a run already past its last checkpoint
/// finishes and its output is discarded. Cancelling a terminal job is a
/// no-op that reports the terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<SubmitResponse>> {
    let job_id = JobId::parse(&job_id)?;
    let job_state = state.coordinator.cancel(job_id).await?;
    Ok(Json(SubmitResponse {
        job_id,
        state: job_state,
    }))
}
