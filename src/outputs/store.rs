//! The persisted article collection.
//!
//! The store is one pretty-printed JSON array, fully rewritten on every merge.
//! [`merge`] is pure: it reconciles freshly scraped records against what is on
//! disk. [`Store`] wraps it with load, atomic replace and an advisory lock so
//! concurrent runs never interleave writes.
//!
//! # Merge rules
//!
//! - `link` is the identity key; the copy already in the store wins
//! - records older than the retention window (by `fetched_at`) are dropped
//! - the result is sorted newest first and cut to the configured maximum
//!
//! # Write path
//!
//! ```text
//! data/.news_db.json.tmp   <- serialize, write, fsync
//! data/news_db.json        <- rename over the old file
//! ```
//!
//! A failure anywhere before the rename leaves the previous file untouched.

use crate::config::{SortKey, StoreSettings};
use crate::models::ArticleRecord;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self as stdfs, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};

/// A lock older than this is assumed to belong to a crashed run.
const STALE_LOCK: StdDuration = StdDuration::from_secs(2 * 60 * 60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store is not a valid article list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store is locked by another run ({0})")]
    Locked(String),
}

/// Retention, size and ordering rules applied on every merge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    pub retention: Duration,
    pub max_records: Option<usize>,
    pub sort_by: SortKey,
}

impl MergePolicy {
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            retention: Duration::days(settings.retention_days),
            max_records: settings.max_records,
            sort_by: settings.sort_by,
        }
    }
}

/// Merge `new` into `existing`.
///
/// Returns the full collection to persist and the new records that were
/// accepted (not already present, not stale). Accepted records may still fall
/// off the end when the collection is over its maximum size.
pub fn merge(
    new: Vec<ArticleRecord>,
    existing: Vec<ArticleRecord>,
    policy: &MergePolicy,
    now: DateTime<Utc>,
) -> (Vec<ArticleRecord>, Vec<ArticleRecord>) {
    let cutoff = now - policy.retention;
    let fresh = |r: &ArticleRecord| r.fetched_at >= cutoff;

    let before = existing.len();
    let existing: Vec<ArticleRecord> = existing
        .into_iter()
        .filter(fresh)
        .unique_by(|r| r.link.clone())
        .collect();
    if existing.len() < before {
        debug!(dropped = before - existing.len(), "Pruned stale or duplicate stored records");
    }

    let known: HashSet<&str> = existing.iter().map(|r| r.link.as_str()).collect();
    let accepted: Vec<ArticleRecord> = new
        .into_iter()
        .filter(|r| fresh(r) && !known.contains(r.link.as_str()))
        .unique_by(|r| r.link.clone())
        .collect();

    let mut merged: Vec<ArticleRecord> = accepted.iter().cloned().chain(existing).collect();
    merged.sort_by(|a, b| newest_first(a, b, policy.sort_by));
    if let Some(max) = policy.max_records {
        merged.truncate(max);
    }
    (merged, accepted)
}

fn newest_first(a: &ArticleRecord, b: &ArticleRecord, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::FetchedAt => b.fetched_at.cmp(&a.fetched_at),
        SortKey::PublicationDate => b
            .publication_date
            .cmp(&a.publication_date)
            .then_with(|| b.fetched_at.cmp(&a.fetched_at)),
    };
    primary.then_with(|| a.link.cmp(&b.link))
}

/// Result of one merge-and-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub accepted: usize,
    pub total: usize,
}

/// The on-disk collection at one path.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    policy: MergePolicy,
}

impl Store {
    pub fn new(settings: &StoreSettings) -> Self {
        Self {
            path: settings.path.clone(),
            policy: MergePolicy::from_settings(settings),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the advisory lock for this store.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.path)
    }

    /// Read the collection; a missing or empty file is an empty collection.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Vec<ArticleRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No store yet; starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<ArticleRecord> = serde_json::from_str(&raw)?;
        info!(count = records.len(), "Loaded stored articles");
        Ok(records)
    }

    /// Load, merge `new`, and atomically replace the file.
    ///
    /// A store that cannot be read is never overwritten.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), new = new.len()))]
    pub async fn merge_and_write(
        &self,
        new: Vec<ArticleRecord>,
        now: DateTime<Utc>,
    ) -> Result<MergeSummary, StoreError> {
        let existing = self.load().await.inspect_err(|e| {
            error!(error = %e, "Cannot read store; leaving it untouched");
        })?;
        let (merged, accepted) = merge(new, existing, &self.policy, now);
        self.write(&merged).await?;
        let summary = MergeSummary {
            accepted: accepted.len(),
            total: merged.len(),
        };
        info!(accepted = summary.accepted, total = summary.total, "Store updated");
        Ok(summary)
    }

    /// Replace the file with `records`, all or nothing.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), count = records.len()))]
    pub async fn write(&self, records: &[ArticleRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = temp_path(&self.path);

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(json.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            error!(error = %e, "Store write failed; previous file kept");
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(bytes = json.len(), "Store written");
        Ok(())
    }
}

/// Sibling temp file, so the final rename stays on one file system.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Exclusive `<store>.lock` file, removed on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(store: &Path) -> Result<Self, StoreError> {
        let mut name = store.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(&path) {
                    warn!(path = %path.display(), "Reclaiming stale store lock");
                    stdfs::remove_file(&path)?;
                    Ok(Self::create(&path)?)
                } else {
                    Err(StoreError::Locked(path.display().to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "Store lock taken");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

fn is_stale(path: &Path) -> bool {
    stdfs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > STALE_LOCK)
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = stdfs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Could not remove store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 20, 12, 0, 0).unwrap()
    }

    fn record(link: &str, age_days: i64) -> ArticleRecord {
        let mut r = ArticleRecord::skeleton(
            format!("Gold story {link}"),
            format!("https://example.com/{link}"),
            "example.com".to_string(),
            "2025-05-20".to_string(),
        );
        r.fetched_at = now() - Duration::days(age_days);
        r.score = 10.0;
        r
    }

    fn policy(max: Option<usize>) -> MergePolicy {
        MergePolicy {
            retention: Duration::days(14),
            max_records: max,
            sort_by: SortKey::FetchedAt,
        }
    }

    fn links(records: &[ArticleRecord]) -> Vec<&str> {
        records.iter().map(|r| r.link.as_str()).collect()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = vec![record("a", 1), record("b", 3)];
        let new = vec![record("c", 0), record("a", 0)];
        let p = policy(Some(100));

        let (once, accepted) = merge(new.clone(), existing, &p, now());
        assert_eq!(links(&accepted), vec!["https://example.com/c"]);
        let (twice, accepted_again) = merge(new, once.clone(), &p, now());
        assert_eq!(once, twice);
        assert!(accepted_again.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent_under_truncation() {
        let new: Vec<_> = (0..5).map(|i| record(&format!("n{i}"), 0)).collect();
        let p = policy(Some(3));
        let (once, _) = merge(new.clone(), vec![record("old", 2)], &p, now());
        let (twice, _) = merge(new, once.clone(), &p, now());
        assert_eq!(once.len(), 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_links_unique_and_first_seen_wins() {
        let mut stored = record("a", 2);
        stored.title = "Stored title".to_string();
        let mut dup_new = record("a", 0);
        dup_new.title = "Newer title".to_string();
        let new = vec![dup_new, record("b", 0), record("b", 0)];

        let (merged, accepted) = merge(new, vec![stored.clone(), stored.clone()], &policy(None), now());
        assert_eq!(merged.len(), 2);
        assert_eq!(accepted.len(), 1);
        let a = merged.iter().find(|r| r.link.ends_with("/a")).unwrap();
        assert_eq!(a.title, "Stored title");
        assert_eq!(a.fetched_at, stored.fetched_at);
    }

    #[test]
    fn test_retention_and_cap() {
        let existing: Vec<_> = (0..20).map(|i| record(&format!("e{i}"), i)).collect();
        let new = vec![record("stale-new", 30), record("fresh", 0)];
        let (merged, accepted) = merge(new, existing, &policy(Some(10)), now());

        let cutoff = now() - Duration::days(14);
        assert!(merged.iter().all(|r| r.fetched_at >= cutoff));
        assert_eq!(merged.len(), 10);
        assert_eq!(links(&accepted), vec!["https://example.com/fresh"]);
        assert!(merged.windows(2).all(|w| w[0].fetched_at >= w[1].fetched_at));
    }

    #[test]
    fn test_sort_by_publication_date() {
        let mut a = record("a", 0);
        a.publication_date = "2025-05-01".to_string();
        let mut b = record("b", 5);
        b.publication_date = "2025-05-10".to_string();
        let p = MergePolicy {
            sort_by: SortKey::PublicationDate,
            ..policy(None)
        };
        let (merged, _) = merge(vec![a], vec![b], &p, now());
        assert_eq!(links(&merged), vec!["https://example.com/b", "https://example.com/a"]);
    }

    fn store_in(dir: &Path) -> Store {
        Store::new(&StoreSettings {
            path: dir.join("news_db.json"),
            ..StoreSettings::default()
        })
    }

    #[tokio::test]
    async fn test_load_missing_and_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load().await.unwrap().is_empty());

        let legacy = json!([{
            "title": "Gold steadies",
            "link": "https://example.com/g",
            "source": "example.com",
            "pub_date": "2025-05-19",
            "fetched_at": "2025-05-19T10:00:00.123456",
            "score": 9.0,
            "summary_model": "local"
        }]);
        std::fs::write(store.path(), legacy.to_string()).unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded[0].publication_date, "2025-05-19");
        assert!(!loaded[0].summarized);
        assert_eq!(loaded[0].extra["summary_model"], "local");
    }

    #[tokio::test]
    async fn test_merge_and_write_persists_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let summary = store
            .merge_and_write(vec![record("a", 0), record("b", 0)], now())
            .await
            .unwrap();
        assert_eq!(summary, MergeSummary { accepted: 2, total: 2 });

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("[\n"));
        assert!(raw.contains("\"publication_date\""));
        assert!(!temp_path(store.path()).exists());

        let again = store.merge_and_write(vec![record("a", 0)], now()).await.unwrap();
        assert_eq!(again, MergeSummary { accepted: 0, total: 2 });
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.write(&[record("a", 0)]).await.unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(temp_path(store.path())).unwrap();
        let err = store.merge_and_write(vec![record("b", 0)], now()).await;
        assert!(matches!(err, Err(StoreError::Io(_))));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_corrupt_store_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        let err = store.merge_and_write(vec![record("a", 0)], now()).await;
        assert!(matches!(err, Err(StoreError::Json(_))));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let lock = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(StoreError::Locked(_))));
        drop(lock);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let lock_path = dir.path().join("news_db.json.lock");
        let file = std::fs::File::create(&lock_path).unwrap();
        file.set_modified(SystemTime::now() - StdDuration::from_secs(3 * 60 * 60))
            .unwrap();
        drop(file);
        assert!(store.lock().is_ok());
    }
}
