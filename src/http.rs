//! HTTP Surface (C9): adapts the Job Manager to the service's endpoint table.
//!
//! `AppState` + `Router` + `CorsLayer::permissive()` + `axum::serve`, and a
//! file-download handler that streams a file back with an explicit content
//! type and disposition header. Owner identity stands in for a session
//! cookie: an `X-Owner-Id` header, falling back to a per-request random id
//! since there is no login here.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::error::JobError;
use crate::job::{FileOutcome, JobManager, PendingUpload, StatusView};
use crate::logs::LogRing;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub settings: Arc<Settings>,
    pub log_ring: LogRing,
}

pub fn create_router(state: AppState) -> Router {
    let max_upload = state.settings.max_upload_bytes as usize;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/process", post(process).layer(DefaultBodyLimit::max(max_upload)))
        .route("/process-status/:id", get(process_status))
        .route("/cancel-process/:id", post(cancel_process))
        .route("/download/:id", get(download))
        .route("/logs", get(logs))
        .route("/status", get(global_status))
        .route("/clear-cache", get(clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn owner_id(headers: &HeaderMap) -> String {
    headers
        .get("X-Owner-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("anon-{}", uuid::Uuid::new_v4()))
}

#[derive(Serialize)]
struct ProcessResponse {
    process_id: String,
}

/// POST /process — stage each multipart field's bytes under a scratch
/// directory (preserving the client-supplied relative path), then hand them
/// to the Job Manager, which validates, re-stages, and launches the job.
async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let owner = owner_id(&headers);
    let scratch = match tempfile::tempdir_in(&state.settings.staging_root) {
        Ok(d) => d,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("could not create scratch directory: {e}") })),
            )
                .into_response();
        }
    };

    let mut uploads = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("malformed multipart body: {e}") })),
                )
                    .into_response();
            }
        };

        let Some(submitted_path) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        if submitted_path.is_empty() {
            continue;
        }

        let scratch_name = format!("{}-{}", uploads.len(), sanitize_scratch_name(&submitted_path));
        let scratch_path = scratch.path().join(scratch_name);

        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("failed reading upload: {e}") })),
                )
                    .into_response();
            }
        };
        if let Err(e) = tokio::fs::write(&scratch_path, &bytes).await {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("failed staging upload: {e}") })),
            )
                .into_response();
        }

        uploads.push(PendingUpload {
            submitted_path,
            temp_path: scratch_path,
            size_bytes: bytes.len() as u64,
        });
    }

    if uploads.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no files provided" })),
        )
            .into_response();
    }

    // Staging, path sanitisation, and per-file page counting (a blocking
    // `pdfinfo` subprocess wait) all happen inside `submit`; run it on a
    // blocking-safe thread rather than stalling the tokio worker handling
    // this request, mirroring `worker.rs`'s `spawn_blocking` around
    // `process_file`.
    let manager = state.manager.clone();
    let submit_result = tokio::task::spawn_blocking(move || manager.submit(&owner, uploads))
        .await
        .unwrap_or_else(|e| Err(JobError::Internal(format!("submission task panicked: {e}"))));

    match submit_result {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(ProcessResponse { process_id: job.id.clone() }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

fn sanitize_scratch_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '/' || c == '_' || c == '-' {
            c
        } else {
            '_'
        })
        .collect::<String>()
        .replace('/', "__")
}

#[derive(Serialize)]
struct LiveResponse {
    message: &'static str,
    process_id: String,
    elapsed_seconds: u64,
    cancel_requested: bool,
}

#[derive(Serialize)]
struct FileInfo {
    name: String,
    path: String,
    page_count: u32,
    size_mb: f64,
    optimized: bool,
    from_cache: bool,
}

#[derive(Serialize)]
struct Stats {
    optimized_files: usize,
    from_cache: usize,
    total_files: usize,
    cpu_cores: usize,
}

#[derive(Serialize)]
struct TerminalResponse {
    message: &'static str,
    download_url: Option<String>,
    errors: Option<Vec<String>>,
    file_info: Vec<FileInfo>,
    total_pages: u64,
    stats: Stats,
    process_id: String,
    success: bool,
}

async fn process_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.status(&id) {
        Ok(StatusView::Live(live)) => Json(LiveResponse {
            message: "Processing in progress",
            process_id: id,
            elapsed_seconds: live.elapsed_seconds,
            cancel_requested: live.cancel_requested,
        })
        .into_response(),
        Ok(StatusView::Terminal(terminal)) => {
            let success = matches!(terminal.state, crate::job::JobState::Complete);
            let total_pages: u64 = terminal.files.iter().map(|f| f.page_count as u64).sum();
            let file_info = terminal
                .files
                .iter()
                .map(|f| FileInfo {
                    name: f.basename(),
                    path: f.submitted_path.clone(),
                    page_count: f.page_count,
                    size_mb: (f.size_bytes as f64) / (1024.0 * 1024.0),
                    optimized: f.optimised,
                    from_cache: f.outcome == FileOutcome::CacheHit,
                })
                .collect();
            let errors: Vec<String> = terminal
                .result
                .errors
                .iter()
                .map(|(file, reason)| format!("{file}: {reason}"))
                .collect();

            Json(TerminalResponse {
                message: if success { "Processing complete" } else { "Processing failed" },
                download_url: terminal.result.archive_path.as_ref().map(|_| format!("/download/{id}")),
                errors: (!errors.is_empty()).then_some(errors),
                file_info,
                total_pages,
                stats: Stats {
                    optimized_files: terminal.result.optimised,
                    from_cache: terminal.result.cache_hit,
                    total_files: terminal.result.total,
                    cpu_cores: terminal.result.cpu_parallelism,
                },
                process_id: id,
                success,
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
struct CancelResponse {
    success: bool,
    message: String,
}

async fn cancel_process(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.cancel(&id) {
        Ok(()) => Json(CancelResponse {
            success: true,
            message: "Cancel request received. Processing will stop as soon as possible.".to_string(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let path = match state.manager.archive(&id) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    stream_zip(path).await
}

async fn stream_zip(path: PathBuf) -> Response {
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"processed_files.zip\"".to_string(),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => JobError::NotFound(format!("archive missing on disk: {}", path.display())).into_response(),
    }
}

async fn logs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.log_ring.snapshot())
}

#[derive(Serialize)]
struct GlobalStatusResponse {
    current_file: Option<String>,
    current_file_index: usize,
    total_files: usize,
    is_processing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    possible_hang: Option<bool>,
}

async fn global_status(State(state): State<AppState>) -> impl IntoResponse {
    let g = state.manager.global_status();
    Json(GlobalStatusResponse {
        current_file: g.current_file,
        current_file_index: g.current_file_index,
        total_files: g.total_files,
        is_processing: g.is_processing,
        elapsed_seconds: g.elapsed_seconds,
        possible_hang: g.possible_hang,
    })
}

#[derive(Serialize)]
struct ClearCacheResponse {
    success: bool,
    message: String,
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.clear_cache() {
        Ok(count) => Json(ClearCacheResponse {
            success: true,
            message: format!("removed {count} cache entries"),
        }),
        Err(e) => Json(ClearCacheResponse {
            success: false,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::logs::LogRing;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(root: &std::path::Path) -> AppState {
        let mut settings = Settings::default();
        settings.staging_root = root.join("staging");
        settings.cache_root = root.join("cache");
        std::fs::create_dir_all(&settings.staging_root).unwrap();
        let settings = Arc::new(settings);
        let cache = Arc::new(CacheStore::new(
            &settings.cache_root,
            std::time::Duration::from_secs(86400),
            u64::MAX,
        ));
        let log_ring = LogRing::new(settings.log_ring_capacity);
        let manager = JobManager::new(settings.clone(), cache, log_ring.clone());
        AppState { manager, settings, log_ring }
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_job_status_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/process-status/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_process_request_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/process")
                    .header(
                        header::CONTENT_TYPE,
                        "multipart/form-data; boundary=X-BOUNDARY",
                    )
                    .body(Body::from("--X-BOUNDARY--\r\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
