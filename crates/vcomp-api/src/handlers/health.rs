//! Health check handlers.

use std::fmt::Display;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use vcomp_media::FfmpegRunner;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub ffmpeg: CheckStatus,
    pub catalog: CheckStatus,
}

/// Outcome of one dependency probe.
#[derive(Serialize)]
pub struct CheckStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn from_result<T, E: Display>(result: Result<T, E>, started: Instant) -> Self {
        match result {
            Ok(_) => Self {
                status: "ok",
                error: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(e) => Self {
                status: "error",
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Readiness check endpoint (readiness probe).
///
/// Ready when the configured FFmpeg binary resolves and the catalog lists.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let started = Instant::now();
    let ffmpeg_path = state.composer.config().renderer.ffmpeg_path.clone();
    let ffmpeg = CheckStatus::from_result(
        FfmpegRunner::new().with_program(ffmpeg_path).resolve_program(),
        started,
    );

    let started = Instant::now();
    let catalog = CheckStatus::from_result(state.catalog().list().await, started);

    let all_ok = ffmpeg.is_ok() && catalog.is_ok();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks { ffmpeg, catalog },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        warn!(
            ffmpeg = ?response.checks.ffmpeg.error,
            catalog = ?response.checks.catalog.error,
            "Readiness check failed"
        );
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
