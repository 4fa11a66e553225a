//! Content-address derivation for input files.
//!
//! Mirrors the source's `get_file_hash`: the fingerprint always folds in
//! `<size>_<mtime_nanos>`, and additionally folds in file content for files
//! under the 100 MiB threshold. Digest is BLAKE3 instead of MD5 (same
//! "fixed-width, non-cryptographic-or-cryptographic, stable" contract, but
//! reusing a dependency already in the tree rather than adding one for a
//! single call site).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::FingerprintError;

/// Content under this size is hashed in full; at or above it, only size+mtime are used.
pub const CONTENT_HASH_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

/// Stable hex-rendered content address for a file.
pub fn fingerprint(path: &Path) -> Result<String, FingerprintError> {
    let metadata = std::fs::metadata(path)?;
    let size = metadata.len();
    let mtime_nanos = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("{size}_{mtime_nanos}").as_bytes());

    if size < CONTENT_HASH_THRESHOLD_BYTES {
        let mut file = File::open(path)?;
        let mut buf = [0u8; 65536];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn identical_content_same_mtime_same_size_yields_equal_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        std::fs::write(&a, b"%PDF-1.4 hello world").unwrap();
        std::fs::write(&b, b"%PDF-1.4 hello world").unwrap();

        let mtime = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&a, mtime).unwrap();
        filetime::set_file_mtime(&b, mtime).unwrap();

        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn different_content_yields_different_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        let mut fa = File::create(&a).unwrap();
        fa.write_all(b"one").unwrap();
        let mut fb = File::create(&b).unwrap();
        fb.write_all(b"two").unwrap();

        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/path/does-not-exist.pdf");
        assert!(fingerprint(missing).is_err());
    }
}
