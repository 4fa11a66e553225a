//! Ghostscript-backed PDF downsampling for large inputs.
//!
//! Shells out via `std::process::Command`, distinguishing a missing binary
//! (`ErrorKind::NotFound`) from a failed invocation; both are non-fatal here
//! per the optimiser's adoption policy.

use std::path::Path;
use std::process::Command;

/// Outcome of an optimisation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimiseOutcome {
    /// Optimised copy was smaller by the configured margin and was adopted.
    Adopted,
    /// Optimisation ran but didn't save enough size, or the tool failed/was missing;
    /// the original input should be used.
    Skipped,
}

/// Optimises `input` into `output` if `input` is at least `threshold_bytes`, adopting
/// the optimised copy only if it's smaller by `min_reduction_pct`. Always leaves a
/// usable file at `output` (falling back to a copy of `input` when optimisation
/// isn't attempted, not adopted, or fails).
pub fn optimise(
    input: &Path,
    output: &Path,
    threshold_bytes: u64,
    min_reduction_pct: u32,
) -> std::io::Result<OptimiseOutcome> {
    let input_size = std::fs::metadata(input)?.len();

    if input_size < threshold_bytes {
        std::fs::copy(input, output)?;
        return Ok(OptimiseOutcome::Skipped);
    }

    let tmp_dir = tempfile::tempdir()?;
    let candidate = tmp_dir.path().join("optimised.pdf");

    let ran = Command::new("gs")
        .arg("-sDEVICE=pdfwrite")
        .arg("-dCompatibilityLevel=1.4")
        .arg("-dPDFSETTINGS=/ebook")
        .arg("-dNOPAUSE")
        .arg("-dQUIET")
        .arg("-dBATCH")
        .arg(format!("-sOutputFile={}", candidate.display()))
        .arg(input)
        .output();

    let status = match ran {
        Ok(result) => result.status,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("ghostscript binary not found, using original");
            std::fs::copy(input, output)?;
            return Ok(OptimiseOutcome::Skipped);
        }
        Err(e) => {
            tracing::warn!(error = %e, "ghostscript invocation failed, using original");
            std::fs::copy(input, output)?;
            return Ok(OptimiseOutcome::Skipped);
        }
    };

    if !status.success() || !candidate.is_file() {
        std::fs::copy(input, output)?;
        return Ok(OptimiseOutcome::Skipped);
    }

    let candidate_size = std::fs::metadata(&candidate)?.len();
    let reduction_pct = if input_size == 0 {
        0
    } else {
        ((input_size.saturating_sub(candidate_size)) * 100 / input_size) as u32
    };

    if reduction_pct >= min_reduction_pct {
        std::fs::rename(&candidate, output).or_else(|_| std::fs::copy(&candidate, output).map(|_| ()))?;
        Ok(OptimiseOutcome::Adopted)
    } else {
        std::fs::copy(input, output)?;
        Ok(OptimiseOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_skips_and_copies() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"small pdf").unwrap();

        let outcome = optimise(&input, &output, 100 * 1024 * 1024, 10).unwrap();
        assert_eq!(outcome, OptimiseOutcome::Skipped);
        assert_eq!(std::fs::read(&output).unwrap(), b"small pdf");
    }

    #[test]
    fn missing_ghostscript_falls_back_to_copy() {
        // This test only exercises the fallback path meaningfully when `gs` is
        // absent from the sandbox; when present, it still asserts a usable
        // output exists either way, which is the contract that matters here.
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, vec![0u8; 200 * 1024 * 1024]).unwrap();

        let outcome = optimise(&input, &output, 100 * 1024 * 1024, 10);
        assert!(outcome.is_ok());
        assert!(output.is_file());
    }
}
