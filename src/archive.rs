//! Archive Builder (C7): assembles the per-job ZIP, preserving the
//! submitter's folder layout and ordering the entries by submission order.
//!
//! Uses the `zip` crate's `ZipWriter` the same way this codebase reads
//! archives elsewhere with `ZipArchive`, just in the write direction.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;
use crate::job::FileEntry;

/// Writes one ZIP entry per non-failed, non-skipped `FileEntry`, keyed by its
/// `submitted_path` (never the staged absolute path), in submission order.
pub fn build_archive(output_path: &Path, files: &[FileEntry]) -> Result<(), ArchiveError> {
    let zip_file = File::create(output_path)?;
    let mut writer = ZipWriter::new(zip_file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in files {
        if entry.outcome.is_failed() {
            continue;
        }
        let Some(output) = &entry.output_path else {
            continue;
        };

        let name = zip_entry_name(&entry.submitted_path);
        writer.start_file(name, options)?;
        let mut reader = BufReader::new(File::open(output)?);
        std::io::copy(&mut reader, &mut writer)?;
    }

    writer.finish()?.flush()?;
    Ok(())
}

/// Normalizes a submitted path into a ZIP-safe entry name: forward slashes,
/// no leading slash, no traversal (already rejected at staging time).
fn zip_entry_name(submitted_path: &str) -> String {
    submitted_path.replace('\\', "/").trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileOutcome;
    use std::path::PathBuf;

    fn entry(submitted: &str, output: Option<PathBuf>, outcome: FileOutcome) -> FileEntry {
        FileEntry {
            submitted_path: submitted.to_string(),
            staged_path: PathBuf::new(),
            size_bytes: 0,
            page_count: 0,
            fingerprint: None,
            optimised: false,
            outcome,
            output_path: output,
        }
    }

    #[test]
    fn archive_preserves_folder_layout_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("x.pdf");
        let b = dir.path().join("y.pdf");
        std::fs::write(&a, b"AAA").unwrap();
        std::fs::write(&b, b"BBB").unwrap();

        let files = vec![
            entry("A/x.pdf", Some(a), FileOutcome::Ocred),
            entry("A/B/y.pdf", Some(b), FileOutcome::AlreadyOcred),
        ];

        let zip_path = dir.path().join("out.zip");
        build_archive(&zip_path, &files).unwrap();

        let zip_file = File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(zip_file).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "A/x.pdf");
        assert_eq!(archive.by_index(1).unwrap().name(), "A/B/y.pdf");
    }

    #[test]
    fn archive_skips_failed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("x.pdf");
        std::fs::write(&a, b"AAA").unwrap();

        let files = vec![
            entry("x.pdf", Some(a), FileOutcome::Ocred),
            entry("bad.pdf", None, FileOutcome::Failed("boom".to_string())),
        ];

        let zip_path = dir.path().join("out.zip");
        build_archive(&zip_path, &files).unwrap();

        let zip_file = File::open(&zip_path).unwrap();
        let archive = zip::ZipArchive::new(zip_file).unwrap();
        assert_eq!(archive.len(), 1);
    }
}
