//! External OCR engine adapter and page counting.
//!
//! The engine itself (`ocrmypdf`) is an external collaborator invoked per
//! file; this module's job is only to shape its exit status into the
//! discriminated result the worker's decision tree branches on.

mod page_count;

pub use page_count::count_pages;

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::error::OcrError;

/// Outcome of invoking the OCR engine on a single file.
#[derive(Debug)]
pub enum EngineOutcome {
    /// OCR ran and produced an output file.
    Ok,
    /// The engine reports the input already has a text layer.
    AlreadyHasText,
}

/// Substring `ocrmypdf` emits on stderr when it refuses to re-OCR a page that
/// already carries a text layer (its `PriorOcrFoundError`).
const PRIOR_OCR_MARKER: &str = "PriorOcrFoundError";

/// Runs `ocrmypdf` on `input`, writing to `output`, with the policy flags from
/// the external-collaborator contract: deskew on, skip-text on, force-ocr off,
/// optimise off (size is handled separately by the optimiser), single-threaded
/// per invocation (parallelism lives at the file level, in the worker pool).
pub fn ocr_pdf(input: &Path, output: &Path, timeout: Duration) -> Result<EngineOutcome, OcrError> {
    let mut child = Command::new("ocrmypdf")
        .arg("--deskew")
        .arg("--skip-text")
        .arg("--jobs")
        .arg("1")
        .arg("--skip-big")
        .arg("100")
        .arg("--optimize")
        .arg("0")
        .arg("--jpeg-quality")
        .arg("70")
        .arg("--png-quality")
        .arg("70")
        .arg(input)
        .arg(output)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrError::ToolNotFound("ocrmypdf".to_string())
            } else {
                OcrError::Io(e)
            }
        })?;

    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                use std::io::Read;
                let _ = pipe.read_to_string(&mut stderr);
            }

            if status.success() {
                return Ok(EngineOutcome::Ok);
            }
            if stderr.contains(PRIOR_OCR_MARKER) {
                return Ok(EngineOutcome::AlreadyHasText);
            }
            return Err(OcrError::Failed(format!(
                "ocrmypdf exited with {:?}: {}",
                status.code(),
                stderr.trim()
            )));
        }

        if std::time::Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OcrError::Timeout(timeout.as_secs()));
        }

        std::thread::sleep(Duration::from_millis(100));
    }
}

/// True when `ocrmypdf` is reachable on `PATH`.
pub fn is_available() -> bool {
    which::which("ocrmypdf").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_tool_distinctly() {
        // Only meaningful when ocrmypdf truly isn't installed; otherwise this
        // is a smoke test that the call at least doesn't panic.
        if is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"not a real pdf").unwrap();

        let result = ocr_pdf(&input, &output, Duration::from_secs(5));
        assert!(matches!(result, Err(OcrError::ToolNotFound(_))));
    }
}
