//! Video submission, status and artifact handlers.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use vinfer_models::{Artifact, ProcessingParams, ProcessingState, VideoFingerprint};
use vinfer_worker::SubmitOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header carrying the artifact digest on downloads.
pub const ARTIFACT_SHA256_HEADER: &str = "x-artifact-sha256";

/// Query parameters for `POST /api/videos`.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    pub model_version: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub stride: Option<u32>,
    /// Wait for the artifact (default) or return as soon as work is scheduled
    pub wait: Option<bool>,
    /// Per-request waiter timeout, capped by the server default
    pub timeout_secs: Option<u64>,
}

impl SubmitQuery {
    fn into_params(self, defaults: ProcessingParams) -> ApiResult<ProcessingParams> {
        let mut params = match self.model_version {
            Some(version) if !version.trim().is_empty() => ProcessingParams::new(version),
            _ => defaults,
        };

        match (self.width, self.height) {
            (Some(width), Some(height)) => params = params.with_resolution(width, height),
            (None, None) => {}
            _ => {
                return Err(ApiError::bad_request(
                    "width and height must be given together",
                ))
            }
        }

        if let Some(stride) = self.stride {
            params = params.with_frame_stride(stride);
        }

        params.validate().map_err(ApiError::bad_request)?;
        Ok(params)
    }
}

/// Response for a submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub fingerprint: VideoFingerprint,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl SubmitResponse {
    fn ready(fingerprint: VideoFingerprint, artifact: &Artifact) -> Self {
        Self {
            fingerprint,
            status: "ready",
            artifact_size: Some(artifact.len()),
            artifact_sha256: Some(artifact.sha256().to_string()),
            content_type: Some(artifact.content_type().to_string()),
        }
    }

    fn pending(fingerprint: VideoFingerprint) -> Self {
        Self {
            fingerprint,
            status: "pending",
            artifact_size: None,
            artifact_sha256: None,
            content_type: None,
        }
    }
}

/// Submit a video for inference.
///
/// The request body is the raw video.
pub async fn submit_video(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Request body must contain the video"));
    }
    if body.len() > state.service.max_video_size() {
        return Err(ApiError::PayloadTooLarge(format!(
            "Video is {} bytes, limit is {}",
            body.len(),
            state.service.max_video_size()
        )));
    }

    let wait = query.wait.unwrap_or(true);
    let default_timeout = state.service.coordinator().default_timeout();
    let timeout = query
        .timeout_secs
        .map(|secs| Duration::from_secs(secs).min(default_timeout))
        .unwrap_or(default_timeout);
    let params = query.into_params(state.service.default_params())?;

    if wait {
        let processed = state
            .service
            .process_with_timeout(body.to_vec(), params, timeout)
            .await?;
        return Ok((
            StatusCode::OK,
            Json(SubmitResponse::ready(processed.fingerprint, &processed.artifact)),
        ));
    }

    let submission = state.service.enqueue(body.to_vec(), params).await?;
    info!(
        fingerprint = %submission.fingerprint,
        outcome = ?submission.outcome,
        "Video submitted without waiting"
    );
    Ok(match submission.outcome {
        SubmitOutcome::Ready(artifact) => (
            StatusCode::OK,
            Json(SubmitResponse::ready(submission.fingerprint, &artifact)),
        ),
        SubmitOutcome::Started | SubmitOutcome::Joined => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse::pending(submission.fingerprint)),
        ),
    })
}

/// Status of a fingerprint.
#[derive(Debug, Serialize)]
pub struct VideoStatusResponse {
    pub fingerprint: VideoFingerprint,
    #[serde(flatten)]
    pub state: ProcessingState,
}

/// Get the processing status for a fingerprint.
pub async fn get_video_status(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<VideoStatusResponse>> {
    let fingerprint = parse_fingerprint(&fingerprint)?;

    match state.service.state(&fingerprint).await? {
        ProcessingState::Missing => Err(ApiError::not_found(format!(
            "No video with fingerprint {}",
            fingerprint
        ))),
        processing_state => Ok(Json(VideoStatusResponse {
            fingerprint,
            state: processing_state,
        })),
    }
}

/// Download the cached artifact for a fingerprint.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Response> {
    let fingerprint = parse_fingerprint(&fingerprint)?;

    let artifact = state
        .service
        .artifact(&fingerprint)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No artifact for {}", fingerprint)))?;

    let content_type = HeaderValue::from_str(artifact.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let digest = HeaderValue::from_str(artifact.sha256())
        .map_err(|e| ApiError::internal(format!("Invalid digest header: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::HeaderName::from_static(ARTIFACT_SHA256_HEADER), digest),
        ],
        artifact.data().to_vec(),
    )
        .into_response())
}

/// Evict the cached artifact and stored video for a fingerprint.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiResult<StatusCode> {
    let fingerprint = parse_fingerprint(&fingerprint)?;

    if state.service.evict(&fingerprint).await? {
        info!(fingerprint = %fingerprint, "Video evicted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "No video with fingerprint {}",
            fingerprint
        )))
    }
}

fn parse_fingerprint(raw: &str) -> ApiResult<VideoFingerprint> {
    VideoFingerprint::parse(raw).map_err(|e| ApiError::bad_request(format!("Invalid fingerprint: {}", e)))
}
