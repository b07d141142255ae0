//! On-disk cache of fetched media lists, plus the recent-code history.
//!
//! Each event gets a `<code>.json` snapshot of its URL list so a viewer can
//! reopen it without another lookup; `history.json` remembers which codes
//! were opened recently. Everything here is best effort: unreadable files
//! are dropped and refetched rather than surfaced.

use crate::code::AccessCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cached lists older than this are refetched.
pub const CACHE_STALENESS_HOURS: i64 = 24;
/// How many recently opened codes the history keeps.
pub const HISTORY_LIMIT: usize = 10;

const HISTORY_FILE: &str = "history.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Snapshot of one event's media list at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMediaList {
    pub code: AccessCode,
    pub urls: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedMediaList {
    pub fn new(code: AccessCode, urls: Vec<String>) -> Self {
        Self {
            code,
            urls,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > Duration::hours(CACHE_STALENESS_HOURS)
    }
}

/// Directory of cached media lists.
pub struct MediaCache {
    dir: PathBuf,
}

impl MediaCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn list_path(&self, code: &AccessCode) -> PathBuf {
        self.dir.join(format!("{}.json", code.as_str()))
    }

    /// Load the cached list for a code, or `None` when there is nothing
    /// usable. Corrupt and stale snapshots are removed on the way out.
    pub fn load(&self, code: &AccessCode) -> Result<Option<CachedMediaList>, CacheError> {
        let path = self.list_path(code);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let list: CachedMediaList = match serde_json::from_slice(&raw) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "dropping corrupt cache entry");
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };

        if list.is_stale(Utc::now()) {
            tracing::debug!(code = %code, "cache entry stale, dropping");
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(list))
    }

    /// Write a list snapshot, replacing any previous one for the code.
    pub fn store(&self, list: &CachedMediaList) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.list_path(&list.code);
        write_json_atomic(&path, list)?;
        tracing::debug!(code = %list.code, urls = list.urls.len(), "media list cached");
        Ok(())
    }

    /// Drop the cached list for a code, if any.
    pub fn clear(&self, code: &AccessCode) -> Result<(), CacheError> {
        match fs::remove_file(self.list_path(code)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a code as most recently opened.
    pub fn remember(&self, code: &AccessCode) -> Result<(), CacheError> {
        let mut codes = self.history()?;
        codes.retain(|c| c != code);
        codes.insert(0, code.clone());
        codes.truncate(HISTORY_LIMIT);
        self.write_history(&codes)
    }

    /// Remove a code from the history and drop its cached list.
    pub fn forget(&self, code: &AccessCode) -> Result<(), CacheError> {
        let mut codes = self.history()?;
        codes.retain(|c| c != code);
        self.write_history(&codes)?;
        self.clear(code)
    }

    /// Recently opened codes, most recent first.
    pub fn history(&self) -> Result<Vec<AccessCode>, CacheError> {
        let path = self.dir.join(HISTORY_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&raw) {
            Ok(codes) => Ok(codes),
            Err(e) => {
                tracing::warn!(error = %e, "dropping corrupt history file");
                let _ = fs::remove_file(&path);
                Ok(Vec::new())
            }
        }
    }

    fn write_history(&self, codes: &[AccessCode]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        write_json_atomic(&self.dir.join(HISTORY_FILE), &codes)
    }
}

/// Serialize to a sibling temp file, then rename over the target so readers
/// never see a half-written snapshot.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.partial");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn code(raw: &str) -> AccessCode {
        AccessCode::parse(raw).unwrap()
    }

    #[test]
    fn test_store_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());

        let list = CachedMediaList::new(
            code("12345"),
            vec!["https://host/image/a.jpg".into(), "https://host/video/b.mp4".into()],
        );
        cache.store(&list).unwrap();

        let loaded = cache.load(&code("12345")).unwrap().unwrap();
        assert_eq!(loaded.urls, list.urls);
    }

    #[test]
    fn test_missing_entry_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());
        assert!(cache.load(&code("54321")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_entry_is_dropped() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());
        fs::write(dir.path().join("12345.json"), b"{ not json").unwrap();

        assert!(cache.load(&code("12345")).unwrap().is_none());
        assert!(!dir.path().join("12345.json").exists());
    }

    #[test]
    fn test_stale_entry_is_refetched() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());

        let mut list = CachedMediaList::new(code("12345"), vec!["https://host/image/a.jpg".into()]);
        list.fetched_at = Utc::now() - Duration::hours(CACHE_STALENESS_HOURS + 1);
        cache.store(&list).unwrap();

        assert!(cache.load(&code("12345")).unwrap().is_none());
    }

    #[test]
    fn test_history_orders_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());

        cache.remember(&code("11111")).unwrap();
        cache.remember(&code("22222")).unwrap();
        cache.remember(&code("11111")).unwrap();

        let history = cache.history().unwrap();
        assert_eq!(history, vec![code("11111"), code("22222")]);
    }

    #[test]
    fn test_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());

        for n in 0..(HISTORY_LIMIT + 5) {
            cache.remember(&code(&format!("{:05}", 10_000 + n))).unwrap();
        }
        assert_eq!(cache.history().unwrap().len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_forget_removes_history_and_cache() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::new(dir.path());

        let list = CachedMediaList::new(code("12345"), vec!["https://host/image/a.jpg".into()]);
        cache.store(&list).unwrap();
        cache.remember(&code("12345")).unwrap();

        cache.forget(&code("12345")).unwrap();
        assert!(cache.history().unwrap().is_empty());
        assert!(cache.load(&code("12345")).unwrap().is_none());
    }
}
