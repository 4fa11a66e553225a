//! PDF page counting via `pdfinfo`: shell out, parse the `Pages:` line,
//! degrade to 0 on any failure rather than aborting the caller.

use std::path::Path;
use std::process::Command;

/// Returns the page count of `path`, or 0 if it cannot be determined
/// (missing `pdfinfo`, unreadable file, unparseable output). This is
/// metadata only and must never block or fail the caller.
pub fn count_pages(path: &Path) -> u32 {
    let output = match Command::new("pdfinfo").arg(path).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::warn!(
                path = %path.display(),
                "pdfinfo exited non-zero, reporting 0 pages"
            );
            output
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "pdfinfo unavailable, reporting 0 pages");
            return 0;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("Pages:") {
            if let Ok(count) = rest.trim().parse::<u32>() {
                return count;
            }
        }
    }

    tracing::warn!(path = %path.display(), "could not parse pdfinfo output, reporting 0 pages");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_zero_pages() {
        let missing = Path::new("/nonexistent/missing.pdf");
        assert_eq!(count_pages(missing), 0);
    }
}
