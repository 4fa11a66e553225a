//! Content-addressed cache for OCR'd output, avoiding repeat work on resubmission.
//!
//! Entries live two hex characters deep under the cache root so no single
//! directory grows unbounded
//! (`{cache_root}/{fingerprint[0..2]}/{fingerprint}_{basename}`).
//! Admission is atomic: build under a `.tmp` sibling name, then rename.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::CacheError;

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    max_age: Duration,
    max_total_bytes: u64,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration, max_total_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_age,
            max_total_bytes,
        }
    }

    fn entry_path(&self, fingerprint: &str, basename: &str) -> PathBuf {
        let shard = &fingerprint[..fingerprint.len().min(2)];
        self.root
            .join(shard)
            .join(format!("{fingerprint}_{basename}"))
    }

    /// Returns a readable path to a previously admitted artifact, or `None`.
    pub fn lookup(&self, fingerprint: &str, basename: &str) -> Option<PathBuf> {
        let path = self.entry_path(fingerprint, basename);
        path.is_file().then_some(path)
    }

    /// Copies `source_path` into the cache under the derived key, atomically.
    pub fn admit(
        &self,
        fingerprint: &str,
        basename: &str,
        source_path: &Path,
    ) -> Result<PathBuf, CacheError> {
        let dest = self.entry_path(fingerprint, basename);
        let dir = dest.parent().expect("entry path always has a parent");
        std::fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(
            "{}.tmp-{}",
            dest.file_name().unwrap().to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::copy(source_path, &tmp)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(dest)
    }

    /// Removes entries older than `max_age`, then, if still over `max_total_bytes`,
    /// removes the largest remaining entries until at or under budget.
    pub fn evict(&self, now: SystemTime) -> Result<usize, CacheError> {
        let mut entries = self.list_entries()?;
        let mut removed = 0usize;

        entries.retain(|entry| {
            let age_ok = now
                .duration_since(entry.modified)
                .map(|age| age <= self.max_age)
                .unwrap_or(true);
            if !age_ok {
                if std::fs::remove_file(&entry.path).is_ok() {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total > self.max_total_bytes {
            entries.sort_by(|a, b| b.size.cmp(&a.size));
            for entry in entries {
                if total <= self.max_total_bytes {
                    break;
                }
                if std::fs::remove_file(&entry.path).is_ok() {
                    total = total.saturating_sub(entry.size);
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Best-effort delete of every cache entry. Never aborts on a single failure.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let entries = self.list_entries()?;
        let mut removed = 0usize;
        for entry in entries {
            if std::fs::remove_file(&entry.path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn list_entries(&self) -> Result<Vec<CacheFile>, CacheError> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            return Ok(out);
        }
        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.path().is_dir() {
                continue;
            }
            for file in std::fs::read_dir(shard.path())? {
                let file = file?;
                let path = file.path();
                if !path.is_file() {
                    continue;
                }
                let meta = file.metadata()?;
                out.push(CacheFile {
                    path,
                    size: meta.len(),
                    modified: meta.modified()?,
                });
            }
        }
        Ok(out)
    }
}

struct CacheFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_then_lookup_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), Duration::from_secs(86400), u64::MAX);

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("input.pdf");
        std::fs::write(&src, b"pdf bytes").unwrap();

        store.admit("abcd1234", "input.pdf", &src).unwrap();
        let hit = store.lookup("abcd1234", "input.pdf").unwrap();
        assert_eq!(std::fs::read(hit).unwrap(), b"pdf bytes");
    }

    #[test]
    fn lookup_miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), Duration::from_secs(86400), u64::MAX);
        assert!(store.lookup("deadbeef", "x.pdf").is_none());
    }

    #[test]
    fn evict_by_age_removes_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), Duration::from_secs(1), u64::MAX);

        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("input.pdf");
        std::fs::write(&src, b"pdf bytes").unwrap();
        store.admit("abcd1234", "input.pdf", &src).unwrap();

        let future = SystemTime::now() + Duration::from_secs(10);
        let removed = store.evict(future).unwrap();
        assert_eq!(removed, 1);
        assert!(store.lookup("abcd1234", "input.pdf").is_none());
    }

    #[test]
    fn evict_by_size_removes_largest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), Duration::from_secs(86400), 10);

        let src_dir = tempfile::tempdir().unwrap();
        let small = src_dir.path().join("small.pdf");
        let big = src_dir.path().join("big.pdf");
        std::fs::write(&small, vec![0u8; 5]).unwrap();
        std::fs::write(&big, vec![0u8; 20]).unwrap();

        store.admit("aaaa", "small.pdf", &small).unwrap();
        store.admit("bbbb", "big.pdf", &big).unwrap();

        store.evict(SystemTime::now()).unwrap();
        assert!(store.lookup("aaaa", "small.pdf").is_some());
        assert!(store.lookup("bbbb", "big.pdf").is_none());
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), Duration::from_secs(86400), u64::MAX);
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("input.pdf");
        std::fs::write(&src, b"pdf bytes").unwrap();
        store.admit("abcd", "input.pdf", &src).unwrap();

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.lookup("abcd", "input.pdf").is_none());
    }
}
