//! Runtime configuration.
//!
//! Settings load from built-in defaults, then get overridden by environment
//! variables (`dotenvy::dotenv()` is invoked once at process start so a `.env`
//! file works the same as exported variables).

use std::path::PathBuf;

/// All tunables the service recognizes, with the defaults the source used.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Parent directory for per-job staging trees and assembled archives.
    pub staging_root: PathBuf,
    /// Root directory of the content-addressed OCR cache.
    pub cache_root: PathBuf,
    /// Maximum combined upload size accepted by `/process`.
    pub max_upload_bytes: u64,
    /// File extensions (lowercase, no dot) accepted by `/process`.
    pub allowed_extensions: Vec<String>,
    /// Cache entries older than this are evicted first.
    pub cache_max_age_days: u64,
    /// After age-based eviction, cache is trimmed to this size if still over.
    pub cache_max_total_bytes: u64,
    /// Files at or above this size get a ghostscript optimisation pass.
    pub optimise_threshold_bytes: u64,
    /// Optimised copy must be at least this many percentage points smaller to be adopted.
    pub optimise_min_reduction_pct: u32,
    /// Upper bound on concurrent OCR workers for a single job.
    pub worker_cap: usize,
    /// Per-file OCR timeout.
    pub per_file_timeout_seconds: u64,
    /// `possible_hang` flips true after this many idle seconds during processing.
    pub hang_warning_seconds: u64,
    /// Capacity of the process-wide log ring.
    pub log_ring_capacity: usize,
    /// Whether a file that fails OCR outright is still delivered via its original bytes.
    pub forgiving_ocr_failures: bool,
    /// `tracing_subscriber::EnvFilter` directive string, overridable via `RUST_LOG`.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("./uploads"),
            cache_root: PathBuf::from("./ocr_cache"),
            max_upload_bytes: 1536 * 1024 * 1024, // 1.5 GiB
            allowed_extensions: vec!["pdf".to_string()],
            cache_max_age_days: 7,
            cache_max_total_bytes: 5000 * 1024 * 1024, // 5000 MiB
            optimise_threshold_bytes: 100 * 1024 * 1024, // 100 MiB
            optimise_min_reduction_pct: 10,
            worker_cap: 4,
            per_file_timeout_seconds: 1800,
            hang_warning_seconds: 120,
            log_ring_capacity: 100,
            forgiving_ocr_failures: true,
            log_filter: "ocrbatch=info".to_string(),
        }
    }
}

impl Settings {
    /// Build settings from defaults overridden by `OCRBATCH_*` environment variables.
    pub fn load() -> Self {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("OCRBATCH_STAGING_ROOT") {
            settings.staging_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OCRBATCH_CACHE_ROOT") {
            settings.cache_root = PathBuf::from(v);
        }
        if let Some(v) = env_u64("OCRBATCH_MAX_UPLOAD_BYTES") {
            settings.max_upload_bytes = v;
        }
        if let Ok(v) = std::env::var("OCRBATCH_ALLOWED_EXTENSIONS") {
            settings.allowed_extensions = v
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_u64("OCRBATCH_CACHE_MAX_AGE_DAYS") {
            settings.cache_max_age_days = v;
        }
        if let Some(v) = env_u64("OCRBATCH_CACHE_MAX_TOTAL_MB") {
            settings.cache_max_total_bytes = v * 1024 * 1024;
        }
        if let Some(v) = env_u64("OCRBATCH_OPTIMISE_THRESHOLD_MB") {
            settings.optimise_threshold_bytes = v * 1024 * 1024;
        }
        if let Some(v) = std::env::var("OCRBATCH_OPTIMISE_MIN_REDUCTION_PCT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            settings.optimise_min_reduction_pct = v;
        }
        if let Some(v) = std::env::var("OCRBATCH_WORKER_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            settings.worker_cap = v;
        }
        if let Some(v) = env_u64("OCRBATCH_PER_FILE_TIMEOUT_SECONDS") {
            settings.per_file_timeout_seconds = v;
        }
        if let Some(v) = env_u64("OCRBATCH_HANG_WARNING_SECONDS") {
            settings.hang_warning_seconds = v;
        }
        if let Some(v) = std::env::var("OCRBATCH_LOG_RING_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            settings.log_ring_capacity = v;
        }
        if let Ok(v) = std::env::var("OCRBATCH_FORGIVING_OCR_FAILURES") {
            settings.forgiving_ocr_failures = matches!(v.to_lowercase().as_str(), "true" | "1" | "on");
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            settings.log_filter = v;
        }

        settings
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:3030
/// - Host and port: "0.0.0.0:3030" -> 0.0.0.0:3030
pub fn parse_bind_address(bind: &str) -> anyhow::Result<(String, u16)> {
    if let Ok(port) = bind.parse::<u16>() {
        return Ok(("127.0.0.1".to_string(), port));
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok((host.to_string(), port));
        }
    }

    Ok((bind.to_string(), 3030))
}
