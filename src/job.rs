//! Job data model and Job Manager (C6): owns every Job, assigns ids,
//! stages uploads, and answers submit/status/cancel/archive/clear-cache.
//!
//! One shared-state struct per kind of thing, mutated under a lock, with
//! callers only ever seeing read snapshots. The registry holds many
//! concurrent jobs rather than a single global job slot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::config::Settings;
use crate::error::JobError;
use crate::logs::LogRing;
use crate::ocr::count_pages;
use crate::worker;

/// Lifecycle state of a Job: Pending -> Running -> (Canceling ->)
/// {Complete | Canceled | Failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Canceling,
    Complete,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Canceled)
    }
}

/// Terminal (or in-flight) disposition of a single file.
///
/// `Optimised` is kept in this enum for schema completeness, but the worker's
/// decision tree always continues past optimisation into the OCR step —
/// optimisation is never the *last* thing that happens to a file, so it's
/// never produced as a job-terminal outcome. Whether a file was optimised is
/// tracked separately via `FileEntry::optimised` and rolled up into
/// `JobResult`/`Stats::optimized_files`. See DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileOutcome {
    NotStarted,
    CacheHit,
    Optimised,
    Ocred,
    AlreadyOcred,
    Failed(String),
    Skipped(String),
}

impl FileOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FileOutcome::NotStarted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed(_) | FileOutcome::Skipped(_))
    }
}

/// One submitted file tracked through its lifecycle.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub submitted_path: String,
    pub staged_path: PathBuf,
    pub size_bytes: u64,
    pub page_count: u32,
    pub fingerprint: Option<String>,
    pub optimised: bool,
    pub outcome: FileOutcome,
    pub output_path: Option<PathBuf>,
}

impl FileEntry {
    pub fn basename(&self) -> String {
        Path::new(&self.submitted_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.submitted_path.clone())
    }
}

/// Aggregate outcome of a terminated job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub total: usize,
    pub cache_hit: usize,
    pub optimised: usize,
    pub failed: usize,
    pub errors: Vec<(String, String)>,
    pub archive_path: Option<PathBuf>,
    pub cpu_parallelism: usize,
}

/// A pending upload, already written to a scratch location by the HTTP
/// surface, awaiting validation and staging by the Job Manager.
pub struct PendingUpload {
    pub submitted_path: String,
    pub temp_path: PathBuf,
    pub size_bytes: u64,
}

/// A snapshot of a live (non-terminal) job, safe to serialize.
pub struct LiveStatus {
    pub state: JobState,
    pub current_file_index: usize,
    pub total_files: usize,
    pub elapsed_seconds: u64,
    pub cancel_requested: bool,
}

/// A snapshot of a terminated job.
pub struct TerminalStatus {
    pub state: JobState,
    pub files: Vec<FileEntry>,
    pub result: JobResult,
}

pub enum StatusView {
    Live(LiveStatus),
    Terminal(TerminalStatus),
}

struct JobInner {
    state: JobState,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    files: Vec<FileEntry>,
    result: Option<JobResult>,
    current_file_index: usize,
    current_file_name: Option<String>,
    last_progress_at: Instant,
}

/// A single batch OCR job. Cheaply clonable (`Arc`-wrapped by the registry);
/// all mutation goes through `inner`, guarded by a plain `Mutex` since every
/// critical section here is a handful of field writes, never an `.await`.
pub struct Job {
    pub id: String,
    pub owner_id: String,
    pub staging_root: PathBuf,
    pub submitted_at: Instant,
    inner: Mutex<JobInner>,
    cancel_signal: Arc<AtomicBool>,
}

impl Job {
    fn new(id: String, owner_id: String, staging_root: PathBuf, files: Vec<FileEntry>) -> Self {
        let now = Instant::now();
        Self {
            id,
            owner_id,
            staging_root,
            submitted_at: now,
            inner: Mutex::new(JobInner {
                state: JobState::Pending,
                started_at: None,
                finished_at: None,
                files,
                result: None,
                current_file_index: 0,
                current_file_name: None,
                last_progress_at: now,
            }),
            cancel_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_signal(&self) -> Arc<AtomicBool> {
        self.cancel_signal.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel_signal.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).files.len()
    }

    /// Number of files with a successful (non-failed, non-skipped) terminal outcome.
    pub fn completed_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .iter()
            .filter(|f| f.output_path.is_some() && !f.outcome.is_failed())
            .count()
    }

    /// Requests cancellation. Returns the state the job was in at signal time.
    fn request_cancel(&self) -> Result<JobState, JobError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.state {
            JobState::Pending => {
                guard.state = JobState::Canceled;
                guard.finished_at = Some(Instant::now());
                self.cancel_signal.store(true, Ordering::SeqCst);
                Ok(JobState::Canceled)
            }
            JobState::Running => {
                guard.state = JobState::Canceling;
                self.cancel_signal.store(true, Ordering::SeqCst);
                Ok(JobState::Canceling)
            }
            other if other.is_terminal() => Err(JobError::AlreadyTerminal),
            other => Ok(other),
        }
    }

    fn mark_running(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.state == JobState::Pending {
            guard.state = JobState::Running;
            guard.started_at = Some(Instant::now());
        }
    }

    fn record_progress(&self, index: usize, report: worker::WorkerReport) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = guard.files.get_mut(index) {
            entry.fingerprint = report.fingerprint;
            entry.optimised = report.optimised;
            entry.output_path = report.output_path;
            entry.outcome = report.outcome;
        }
        guard.current_file_index += 1;
        guard.current_file_name = guard.files.get(index).map(|f| f.submitted_path.clone());
        guard.last_progress_at = Instant::now();
    }

    fn snapshot_live(&self) -> LiveStatus {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        LiveStatus {
            state: guard.state,
            current_file_index: guard.current_file_index,
            total_files: guard.files.len(),
            elapsed_seconds: guard
                .started_at
                .unwrap_or(self.submitted_at)
                .elapsed()
                .as_secs(),
            cancel_requested: self.is_canceled(),
        }
    }

    fn finish(&self, state: JobState, result: JobResult) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.state = state;
        guard.result = Some(result);
        guard.finished_at = Some(Instant::now());
    }

    fn current_file_name(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).current_file_name.clone()
    }

    fn seconds_since_progress(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_progress_at
            .elapsed()
            .as_secs()
    }
}

/// A process-wide snapshot matching the legacy `/status` global endpoint.
pub struct GlobalStatus {
    pub current_file: Option<String>,
    pub current_file_index: usize,
    pub total_files: usize,
    pub is_processing: bool,
    pub elapsed_seconds: Option<u64>,
    pub possible_hang: Option<bool>,
}

/// Central registry of all jobs, plus the owner->last-job index a legacy
/// `/download` (no id) endpoint would rely on.
pub struct JobManager {
    settings: Arc<Settings>,
    cache: Arc<CacheStore>,
    log_ring: LogRing,
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    owner_last_job: Mutex<HashMap<String, String>>,
    last_active_job: Mutex<Option<String>>,
    hang_warning_seconds: u64,
}

impl JobManager {
    pub fn new(settings: Arc<Settings>, cache: Arc<CacheStore>, log_ring: LogRing) -> Arc<Self> {
        let hang_warning_seconds = settings.hang_warning_seconds;
        Arc::new(Self {
            settings,
            cache,
            log_ring,
            jobs: Mutex::new(HashMap::new()),
            owner_last_job: Mutex::new(HashMap::new()),
            last_active_job: Mutex::new(None),
            hang_warning_seconds,
        })
    }

    /// Validates, stages, and registers a new job, then immediately launches
    /// its coordinator — submission and start are fused into one step.
    pub fn submit(
        self: &Arc<Self>,
        owner_id: &str,
        uploads: Vec<PendingUpload>,
    ) -> Result<Arc<Job>, JobError> {
        let valid: Vec<PendingUpload> = uploads
            .into_iter()
            .filter(|u| has_allowed_extension(&u.submitted_path, &self.settings.allowed_extensions))
            .collect();

        if valid.is_empty() {
            return Err(JobError::NoValidInput(
                "no valid PDF files provided".to_string(),
            ));
        }

        let job_id = new_job_id();
        let staging_root = self.settings.staging_root.join(format!("job-{job_id}"));
        std::fs::create_dir_all(&staging_root)?;

        let mut files = Vec::with_capacity(valid.len());
        for upload in valid {
            let staged_rel = match sanitize_relative_path(&upload.submitted_path) {
                Ok(p) => p,
                Err(reason) => {
                    tracing::warn!(job_id = %job_id, path = %upload.submitted_path, %reason, "rejecting unsafe upload path");
                    let _ = std::fs::remove_file(&upload.temp_path);
                    continue;
                }
            };
            let staged_path = staging_root.join(&staged_rel);
            if let Some(parent) = staged_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&upload.temp_path, &staged_path)
                .or_else(|_| std::fs::copy(&upload.temp_path, &staged_path).map(|_| ()))?;

            let page_count = count_pages(&staged_path);
            files.push(FileEntry {
                submitted_path: staged_rel.to_string_lossy().replace('\\', "/"),
                staged_path,
                size_bytes: upload.size_bytes,
                page_count,
                fingerprint: None,
                optimised: false,
                outcome: FileOutcome::NotStarted,
                output_path: None,
            });
        }

        if files.is_empty() {
            let _ = std::fs::remove_dir_all(&staging_root);
            return Err(JobError::NoValidInput(
                "no files survived path validation".to_string(),
            ));
        }

        let job = Arc::new(Job::new(job_id.clone(), owner_id.to_string(), staging_root, files));

        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).insert(job_id.clone(), job.clone());
        self.owner_last_job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(owner_id.to_string(), job_id.clone());
        *self.last_active_job.lock().unwrap_or_else(|e| e.into_inner()) = Some(job_id.clone());

        self.log_ring.push(
            crate::logs::LogLevel::Info,
            format!("job {job_id}: submitted by {owner_id} ({} files)", job.file_count()),
        );

        self.start(job.clone());
        Ok(job)
    }

    fn start(self: &Arc<Self>, job: Arc<Job>) {
        let manager = self.clone();
        let span = tracing::info_span!("job", job_id = %job.id);
        tokio::spawn(
            async move {
                manager.run_job(job).await;
            }
            .instrument(span),
        );
    }

    async fn run_job(self: Arc<Self>, job: Arc<Job>) {
        if job.state() == JobState::Canceled {
            let _ = std::fs::remove_dir_all(&job.staging_root);
            job.finish(
                JobState::Canceled,
                JobResult {
                    total: job.file_count(),
                    cache_hit: 0,
                    optimised: 0,
                    failed: 0,
                    errors: Vec::new(),
                    archive_path: None,
                    cpu_parallelism: 0,
                },
            );
            return;
        }

        job.mark_running();
        worker::run_coordinator(job.clone(), self.cache.clone(), self.settings.clone(), self.log_ring.clone())
            .await;
    }

    pub fn status(&self, job_id: &str) -> Result<StatusView, JobError> {
        let job = self.get(job_id)?;
        if job.state().is_terminal() {
            let guard = job.inner.lock().unwrap_or_else(|e| e.into_inner());
            let result = guard
                .result
                .clone()
                .ok_or_else(|| JobError::Internal("terminal job missing result".to_string()))?;
            return Ok(StatusView::Terminal(TerminalStatus {
                state: guard.state,
                files: guard.files.clone(),
                result,
            }));
        }
        Ok(StatusView::Live(job.snapshot_live()))
    }

    pub fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let job = self.get(job_id)?;
        job.request_cancel()?;
        self.log_ring
            .push(crate::logs::LogLevel::Info, format!("job {job_id}: cancel requested"));
        Ok(())
    }

    pub fn archive(&self, job_id: &str) -> Result<PathBuf, JobError> {
        let job = self.get(job_id)?;
        let guard = job.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.state != JobState::Complete {
            return Err(JobError::NotFound(format!(
                "job {job_id} has no archive (state: {:?})",
                guard.state
            )));
        }
        guard
            .result
            .as_ref()
            .and_then(|r| r.archive_path.clone())
            .ok_or_else(|| JobError::NotFound(format!("job {job_id} has no archive")))
    }

    pub fn clear_cache(&self) -> Result<usize, JobError> {
        Ok(self.cache.clear()?)
    }

    pub fn last_job_for_owner(&self, owner_id: &str) -> Option<String> {
        self.owner_last_job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner_id)
            .cloned()
    }

    /// Global status snapshot for the legacy singleton-style `/status` endpoint:
    /// reflects whichever job was most recently started, mirroring the
    /// source's single process-wide `processing_status` dict.
    pub fn global_status(&self) -> GlobalStatus {
        let last = self.last_active_job.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(job) = last.and_then(|id| self.get(&id).ok()) else {
            return GlobalStatus {
                current_file: None,
                current_file_index: 0,
                total_files: 0,
                is_processing: false,
                elapsed_seconds: None,
                possible_hang: None,
            };
        };

        let is_processing = matches!(job.state(), JobState::Running | JobState::Canceling);
        let live = job.snapshot_live();
        GlobalStatus {
            current_file: job.current_file_name(),
            current_file_index: live.current_file_index,
            total_files: live.total_files,
            is_processing,
            elapsed_seconds: is_processing.then_some(live.elapsed_seconds),
            possible_hang: is_processing
                .then(|| job.seconds_since_progress() > self.hang_warning_seconds),
        }
    }

    fn get(&self, job_id: &str) -> Result<Arc<Job>, JobError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(format!("unknown job id: {job_id}")))
    }
}

impl Job {
    /// Called by the coordinator once the dispatch loop decides the job's
    /// fate. Releases the staging root; retains the archive, if any.
    pub(crate) fn complete(&self, archive_path: Option<PathBuf>, result_state: JobState, mut result: JobResult) {
        result.archive_path = archive_path;
        let _ = std::fs::remove_dir_all(&self.staging_root);
        self.finish(result_state, result);
    }
}

fn new_job_id() -> String {
    hex::encode(uuid::Uuid::new_v4().as_bytes())
}

fn has_allowed_extension(path: &str, allowed: &[String]) -> bool {
    Path::new(path)
        .extension()
        .map(|e| {
            let e = e.to_string_lossy().to_lowercase();
            allowed.iter().any(|a| a.eq_ignore_ascii_case(&e))
        })
        .unwrap_or(false)
}

/// Splits `raw` on `/`, rejects `..` segments and empty/absolute paths, and
/// returns a path safe to join under a staging root.
pub fn sanitize_relative_path(raw: &str) -> Result<PathBuf, String> {
    let mut out = PathBuf::new();
    let mut any = false;
    for segment in raw.split(['/', '\\']) {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err(format!("path traversal segment in {raw:?}"));
        }
        out.push(sanitize_segment(segment));
        any = true;
    }
    if !any {
        return Err(format!("empty path: {raw:?}"));
    }
    Ok(out)
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Interface the coordinator (`worker::run_coordinator`) drives a `Job`
/// through, without exposing `JobInner` directly.
impl Job {
    pub fn files_snapshot(&self) -> Vec<FileEntry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).files.clone()
    }

    pub fn set_dispatch_file(&self, index: usize) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = guard.files.get(index) {
            guard.current_file_name = Some(entry.submitted_path.clone());
        }
    }

    pub fn apply_worker_report(&self, index: usize, report: worker::WorkerReport) {
        self.record_progress(index, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_relative_path("../etc/passwd").is_err());
        assert!(sanitize_relative_path("a/../b").is_err());
    }

    #[test]
    fn sanitize_preserves_folder_layout() {
        let p = sanitize_relative_path("A/B/y.pdf").unwrap();
        assert_eq!(p, PathBuf::from("A/B/y.pdf"));
    }

    #[test]
    fn sanitize_strips_control_characters() {
        let p = sanitize_relative_path("weird\0name.pdf").unwrap();
        assert_eq!(p, PathBuf::from("weird_name.pdf"));
    }

    #[test]
    fn pdf_extension_check_is_case_insensitive() {
        let allowed = vec!["pdf".to_string()];
        assert!(has_allowed_extension("a.PDF", &allowed));
        assert!(has_allowed_extension("a.pdf", &allowed));
        assert!(!has_allowed_extension("a.txt", &allowed));
    }

    #[test]
    fn submit_rejects_non_pdf_and_empty_submissions() {
        let settings = Arc::new(Settings::default());
        let dir = tempfile::tempdir().unwrap();
        let mut settings = (*settings).clone();
        settings.staging_root = dir.path().to_path_buf();
        let cache = Arc::new(CacheStore::new(
            dir.path().join("cache"),
            std::time::Duration::from_secs(86400),
            u64::MAX,
        ));
        let manager = JobManager::new(Arc::new(settings), cache, LogRing::new(10));

        let bogus = dir.path().join("bogus.txt");
        std::fs::write(&bogus, b"not a pdf").unwrap();

        let result = manager.submit(
            "owner-1",
            vec![PendingUpload {
                submitted_path: "bogus.txt".to_string(),
                temp_path: bogus,
                size_bytes: 9,
            }],
        );
        assert!(matches!(result, Err(JobError::NoValidInput(_))));
    }

    #[test]
    fn submit_accepts_pdf_extension_regardless_of_content() {
        // Validation is extension-only (SPEC_FULL.md §4.9/§4.6); content that
        // doesn't sniff as a real PDF is the OCR engine's problem, not the
        // submission layer's.
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.staging_root = dir.path().to_path_buf();
        let cache = Arc::new(CacheStore::new(
            dir.path().join("cache"),
            std::time::Duration::from_secs(86400),
            u64::MAX,
        ));
        let manager = JobManager::new(Arc::new(settings), cache, LogRing::new(10));

        let fake = dir.path().join("fake.pdf");
        std::fs::write(&fake, b"this is plain text, not a PDF").unwrap();

        let job = manager
            .submit(
                "owner-1",
                vec![PendingUpload {
                    submitted_path: "fake.pdf".to_string(),
                    temp_path: fake,
                    size_bytes: 30,
                }],
            )
            .unwrap();
        assert_eq!(job.file_count(), 1);
    }
}
