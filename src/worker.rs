//! OCR Worker (C4) and the per-job coordinator that dispatches files to a
//! bounded pool of workers and aggregates their outcomes.
//!
//! Follows the usual spawn / poll-a-shared-status / update-progress-per-item
//! shape for a background job, generalized with a `tokio::sync::Semaphore`
//! so a bounded pool of files runs concurrently instead of one at a time.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::archive;
use crate::cache::CacheStore;
use crate::config::Settings;
use crate::fingerprint;
use crate::job::{FileEntry, FileOutcome, Job, JobResult, JobState};
use crate::logs::{LogLevel, LogRing};
use crate::ocr::{self, EngineOutcome};
use crate::optimiser::{self, OptimiseOutcome};

/// What a single worker invocation reports back to the coordinator.
pub struct WorkerReport {
    pub fingerprint: Option<String>,
    pub optimised: bool,
    pub outcome: FileOutcome,
    pub output_path: Option<PathBuf>,
}

/// Runs the full cancel/fingerprint/cache/optimise/OCR decision tree for one
/// file. Synchronous and blocking (file I/O, subprocess calls) — callers
/// must run this on a blocking-safe thread (`tokio::task::spawn_blocking`).
pub fn process_file(
    entry: &FileEntry,
    job_id: &str,
    cancel: &std::sync::atomic::AtomicBool,
    cache: &CacheStore,
    settings: &Settings,
) -> WorkerReport {
    let output_path = entry.staged_path.with_extension("ocr.pdf");
    let basename = entry.basename();

    if cancel.load(Ordering::SeqCst) {
        return WorkerReport {
            fingerprint: None,
            optimised: false,
            outcome: FileOutcome::Skipped("canceled".to_string()),
            output_path: None,
        };
    }

    let fp = match fingerprint::fingerprint(&entry.staged_path) {
        Ok(fp) => fp,
        Err(e) => {
            tracing::warn!(job_id, file = %entry.submitted_path, error = %e, "fingerprint failed");
            return WorkerReport {
                fingerprint: None,
                optimised: false,
                outcome: FileOutcome::Failed(format!("could not fingerprint: {e}")),
                output_path: None,
            };
        }
    };

    if let Some(cached) = cache.lookup(&fp, &basename) {
        if let Err(e) = std::fs::copy(&cached, &output_path) {
            tracing::warn!(job_id, file = %entry.submitted_path, error = %e, "cache hit but copy failed");
            return WorkerReport {
                fingerprint: Some(fp),
                optimised: false,
                outcome: FileOutcome::Failed(format!("cache copy failed: {e}")),
                output_path: None,
            };
        }
        return WorkerReport {
            fingerprint: Some(fp),
            optimised: false,
            outcome: FileOutcome::CacheHit,
            output_path: Some(output_path),
        };
    }

    let scratch = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            return WorkerReport {
                fingerprint: Some(fp),
                optimised: false,
                outcome: FileOutcome::Failed(format!("scratch dir failed: {e}")),
                output_path: None,
            }
        }
    };
    let optimise_candidate = scratch.path().join(&basename);
    let (ocr_input, optimised) = match optimiser::optimise(
        &entry.staged_path,
        &optimise_candidate,
        settings.optimise_threshold_bytes,
        settings.optimise_min_reduction_pct,
    ) {
        Ok(OptimiseOutcome::Adopted) => (optimise_candidate, true),
        Ok(OptimiseOutcome::Skipped) => (optimise_candidate, false),
        Err(e) => {
            tracing::warn!(job_id, file = %entry.submitted_path, error = %e, "optimiser failed, using original");
            (entry.staged_path.clone(), false)
        }
    };

    if cancel.load(Ordering::SeqCst) {
        return WorkerReport {
            fingerprint: Some(fp),
            optimised,
            outcome: FileOutcome::Skipped("canceled".to_string()),
            output_path: None,
        };
    }

    let timeout = Duration::from_secs(settings.per_file_timeout_seconds);
    match ocr::ocr_pdf(&ocr_input, &output_path, timeout) {
        Ok(EngineOutcome::Ok) => {
            if let Err(e) = cache.admit(&fp, &basename, &output_path) {
                tracing::warn!(job_id, file = %entry.submitted_path, error = %e, "cache admission failed");
            }
            WorkerReport {
                fingerprint: Some(fp),
                optimised,
                outcome: FileOutcome::Ocred,
                output_path: Some(output_path),
            }
        }
        Ok(EngineOutcome::AlreadyHasText) => {
            if let Err(e) = std::fs::copy(&entry.staged_path, &output_path) {
                return WorkerReport {
                    fingerprint: Some(fp),
                    optimised,
                    outcome: FileOutcome::Failed(format!("copy-through failed: {e}")),
                    output_path: None,
                };
            }
            if let Err(e) = cache.admit(&fp, &basename, &output_path) {
                tracing::warn!(job_id, file = %entry.submitted_path, error = %e, "cache admission failed");
            }
            WorkerReport {
                fingerprint: Some(fp),
                optimised,
                outcome: FileOutcome::AlreadyOcred,
                output_path: Some(output_path),
            }
        }
        Err(e) => {
            tracing::error!(job_id, file = %entry.submitted_path, error = %e, "OCR failed");
            if settings.forgiving_ocr_failures {
                match std::fs::copy(&entry.staged_path, &output_path) {
                    // Deliberately not admitted to cache: these bytes never went
                    // through OCR, so caching them under this fingerprint would
                    // serve a non-OCR'd file to a future cache hit.
                    Ok(_) => WorkerReport {
                        fingerprint: Some(fp),
                        optimised,
                        outcome: FileOutcome::Ocred,
                        output_path: Some(output_path),
                    },
                    Err(copy_err) => WorkerReport {
                        fingerprint: Some(fp),
                        optimised,
                        outcome: FileOutcome::Failed(format!("{e} (copy-through failed: {copy_err})")),
                        output_path: None,
                    },
                }
            } else {
                WorkerReport {
                    fingerprint: Some(fp),
                    optimised,
                    outcome: FileOutcome::Failed(e.to_string()),
                    output_path: None,
                }
            }
        }
    }
}

/// Dispatches every file of `job` to a bounded worker pool, updates progress
/// as each completes, then builds the archive and transitions the job to a
/// terminal state.
pub async fn run_coordinator(
    job: Arc<Job>,
    cache: Arc<CacheStore>,
    settings: Arc<Settings>,
    log_ring: LogRing,
) {
    let total = job.file_count();
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(total.max(1))
        .min(settings.worker_cap)
        .max(1);

    log_ring.push(
        LogLevel::Info,
        format!("job {}: starting with {workers} workers for {total} files", job.id),
    );

    let semaphore = Arc::new(Semaphore::new(workers));
    let files = job.files_snapshot();
    let mut handles = Vec::with_capacity(total);

    for (index, entry) in files.into_iter().enumerate() {
        if job.is_canceled() {
            job.apply_worker_report(
                index,
                WorkerReport {
                    fingerprint: None,
                    optimised: false,
                    outcome: FileOutcome::Skipped("canceled".to_string()),
                    output_path: None,
                },
            );
            continue;
        }

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        job.set_dispatch_file(index);

        let job = job.clone();
        let cache = cache.clone();
        let settings = settings.clone();
        let log_ring = log_ring.clone();
        let job_id = job.id.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let cancel = job.cancel_signal();
            let report = tokio::task::spawn_blocking(move || {
                process_file(&entry, &job_id, &cancel, &cache, &settings)
            })
            .await
            .unwrap_or_else(|e| WorkerReport {
                fingerprint: None,
                optimised: false,
                outcome: FileOutcome::Failed(format!("worker task panicked: {e}")),
                output_path: None,
            });

            log_ring.push(
                LogLevel::Info,
                format!("job {}: file {index} -> {:?}", job.id, report.outcome),
            );
            job.apply_worker_report(index, report);
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    finalize(job, settings, log_ring).await;
}

async fn finalize(job: Arc<Job>, settings: Arc<Settings>, log_ring: LogRing) {
    let files = job.files_snapshot();
    let completed = job.completed_count();
    let cache_hit = files.iter().filter(|f| f.outcome == FileOutcome::CacheHit).count();
    let optimised = files.iter().filter(|f| f.optimised).count();
    let failed = files.iter().filter(|f| f.outcome.is_failed()).count();
    let errors: Vec<(String, String)> = files
        .iter()
        .filter_map(|f| match &f.outcome {
            FileOutcome::Failed(reason) => Some((f.submitted_path.clone(), reason.clone())),
            FileOutcome::Skipped(reason) => Some((f.submitted_path.clone(), reason.clone())),
            _ => None,
        })
        .collect();

    let result = JobResult {
        total: files.len(),
        cache_hit,
        optimised,
        failed,
        errors,
        archive_path: None,
        cpu_parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    };

    if job.is_canceled() && completed == 0 {
        log_ring.push(LogLevel::Info, format!("job {}: canceled before any file completed", job.id));
        job.complete(None, JobState::Canceled, result);
        return;
    }

    if completed == 0 {
        log_ring.push(LogLevel::Error, format!("job {}: no files produced output", job.id));
        job.complete(None, JobState::Failed, result);
        return;
    }

    let archive_dir = settings.staging_root.join("archives");
    if let Err(e) = std::fs::create_dir_all(&archive_dir) {
        tracing::error!(job_id = %job.id, error = %e, "could not create archive directory");
        job.complete(None, JobState::Failed, result);
        return;
    }
    let archive_path = archive_dir.join(format!("processed_files_{}.zip", job.id));

    match archive::build_archive(&archive_path, &files) {
        Ok(()) => {
            log_ring.push(LogLevel::Info, format!("job {}: archive built at {}", job.id, archive_path.display()));
            job.complete(Some(archive_path), JobState::Complete, result);
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "archive build failed");
            job.complete(None, JobState::Failed, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use std::sync::atomic::AtomicBool;

    fn test_settings(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.staging_root = root.to_path_buf();
        settings.cache_root = root.join("cache");
        settings
    }

    #[test]
    fn cancel_before_start_yields_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let cache = CacheStore::new(&settings.cache_root, Duration::from_secs(86400), u64::MAX);

        let staged = dir.path().join("a.pdf");
        std::fs::write(&staged, b"%PDF-1.4 content").unwrap();
        let entry = FileEntry {
            submitted_path: "a.pdf".to_string(),
            staged_path: staged,
            size_bytes: 10,
            page_count: 1,
            fingerprint: None,
            optimised: false,
            outcome: FileOutcome::NotStarted,
            output_path: None,
        };

        let cancel = AtomicBool::new(true);
        let report = process_file(&entry, "job-1", &cancel, &cache, &settings);
        assert_eq!(report.outcome, FileOutcome::Skipped("canceled".to_string()));
    }

    #[test]
    fn cache_hit_short_circuits_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let cache = CacheStore::new(&settings.cache_root, Duration::from_secs(86400), u64::MAX);

        let staged = dir.path().join("a.pdf");
        std::fs::write(&staged, b"%PDF-1.4 content").unwrap();
        let fp = fingerprint::fingerprint(&staged).unwrap();
        let prior_output = dir.path().join("prior.pdf");
        std::fs::write(&prior_output, b"already ocred bytes").unwrap();
        cache.admit(&fp, "a.pdf", &prior_output).unwrap();

        let entry = FileEntry {
            submitted_path: "a.pdf".to_string(),
            staged_path: staged,
            size_bytes: 10,
            page_count: 1,
            fingerprint: None,
            optimised: false,
            outcome: FileOutcome::NotStarted,
            output_path: None,
        };

        let cancel = AtomicBool::new(false);
        let report = process_file(&entry, "job-1", &cancel, &cache, &settings);
        assert_eq!(report.outcome, FileOutcome::CacheHit);
        assert_eq!(
            std::fs::read(report.output_path.unwrap()).unwrap(),
            b"already ocred bytes"
        );
    }
}
