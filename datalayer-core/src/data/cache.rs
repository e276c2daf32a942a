//! TTL byte/JSON cache backed by a flat directory.
//!
//! Layout: `{cache_dir}/{sanitized_key}`
//!
//! Features:
//! - Filesystem-safe keys (anything outside `[A-Za-z0-9_.-]` becomes `_`)
//! - Freshness from file modification time vs. a per-manager TTL
//! - Atomic writes (write to a temp file, rename into place)
//! - Expiry sweeps for the CLI `cache clean` command
//!
//! Nothing is held in memory: the mtime of the stored file is the only
//! staleness signal. Concurrent writers to the same key are not coordinated;
//! the last rename wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

/// Sanitized keys longer than this are truncated and suffixed with a digest.
const MAX_KEY_LEN: usize = 200;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry not found: {key}")]
    NotFound { key: String },

    #[error("cache I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("cache JSON error for '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Summary of the cache directory, reported by `datalayer cache status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub entries: usize,
    pub fresh: usize,
    pub total_bytes: u64,
}

/// The byte cache. Cheap to clone; holds no open handles.
#[derive(Debug, Clone)]
pub struct CacheManager {
    base_dir: PathBuf,
    ttl: Duration,
}

impl CacheManager {
    /// Open (and create if needed) a cache rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, CacheError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| CacheError::Io {
            key: base_dir.display().to_string(),
            source,
        })?;
        Ok(Self { base_dir, ttl })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Path an entry for `key` lives at, whether or not it exists yet.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.base_dir.join(sanitize_key(key))
    }

    /// True when the entry exists and was written no more than `ttl` ago.
    ///
    /// A modification time in the future (clock skew) counts as fresh.
    pub fn is_fresh(&self, key: &str) -> bool {
        let Ok(meta) = fs::metadata(self.path_for_key(key)) else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }
        match meta.modified() {
            Ok(mtime) => self.age_within_ttl(mtime),
            Err(_) => false,
        }
    }

    /// Replace the entry for `key` with `data`, returning the entry's path.
    pub fn write_bytes(&self, key: &str, data: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.path_for_key(key);
        let io_err = |source| CacheError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp_path = self.tmp_path_for(&path);
        fs::write(&tmp_path, data).map_err(io_err)?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_err(e)
        })?;

        debug!(key, bytes = data.len(), "cache write");
        Ok(path)
    }

    pub fn read_bytes(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        fs::read(self.path_for_key(key)).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                CacheError::NotFound {
                    key: key.to_string(),
                }
            } else {
                CacheError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<PathBuf, CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })?;
        self.write_bytes(key, &bytes)
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let bytes = self.read_bytes(key)?;
        serde_json::from_slice(&bytes).map_err(|source| CacheError::Json {
            key: key.to_string(),
            source,
        })
    }

    /// Return the cached value for `key` if fresh, otherwise run `loader` once,
    /// persist its result and return it.
    ///
    /// Loader errors are returned as-is and nothing is written. A fresh entry
    /// that fails to decode is treated as a miss and reloaded.
    pub fn get_or_set_json<T, E, F>(&self, key: &str, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        if self.is_fresh(key) {
            match self.read_json(key) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    return Ok(value);
                }
                Err(CacheError::Json { .. }) => {
                    debug!(key, "cache entry undecodable, reloading");
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            debug!(key, "cache miss");
        }

        let value = loader()?;
        self.write_json(key, &value)?;
        Ok(value)
    }

    /// Delete each listed entry that exists and is stale.
    pub fn invalidate_if_expired<'a, I>(&self, keys: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for key in keys {
            let path = self.path_for_key(key);
            if path.exists() && !self.is_fresh(key) {
                remove_if_present(&path).map_err(|source| CacheError::Io {
                    key: key.to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Delete every stale entry in the cache directory. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (path, mtime) in self.entries()? {
            if !self.age_within_ttl(mtime) {
                remove_if_present(&path).map_err(|source| CacheError::Io {
                    key: path.display().to_string(),
                    source,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Count entries, fresh entries, and bytes on disk.
    pub fn status(&self) -> Result<CacheStatus, CacheError> {
        let mut status = CacheStatus::default();
        for (path, mtime) in self.entries()? {
            status.entries += 1;
            if self.age_within_ttl(mtime) {
                status.fresh += 1;
            }
            status.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }
        Ok(status)
    }

    fn entries(&self) -> Result<Vec<(PathBuf, SystemTime)>, CacheError> {
        let dir_err = |source| CacheError::Io {
            key: self.base_dir.display().to_string(),
            source,
        };

        let mut out = Vec::new();
        for entry in fs::read_dir(&self.base_dir).map_err(dir_err)? {
            let entry = entry.map_err(dir_err)?;
            let path = entry.path();
            // In-flight temp files belong to a concurrent writer
            if is_tmp_file(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            if let Ok(mtime) = meta.modified() {
                out.push((path, mtime));
            }
        }
        Ok(out)
    }

    fn age_within_ttl(&self, mtime: SystemTime) -> bool {
        match SystemTime::now().duration_since(mtime) {
            Ok(age) => age <= self.ttl,
            Err(_) => true,
        }
    }

    fn tmp_path_for(&self, path: &Path) -> PathBuf {
        let id = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{name}.{}-{id}.tmp", std::process::id()))
    }
}

/// Map an arbitrary key to a single filesystem-safe path component.
pub fn sanitize_key(key: &str) -> String {
    let mut safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match safe.as_str() {
        "" | "." => return "_".to_string(),
        ".." => return "__".to_string(),
        _ => {}
    }

    if safe.len() > MAX_KEY_LEN {
        let digest = blake3::hash(key.as_bytes()).to_hex();
        safe.truncate(MAX_KEY_LEN - 17);
        safe.push('-');
        safe.push_str(&digest[..16]);
    }
    safe
}

fn is_tmp_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("tmp")
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cache(ttl_secs: u64) -> (tempfile::TempDir, CacheManager) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(ttl_secs))
            .unwrap();
        (dir, cache)
    }

    fn backdate(path: &Path, by: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn sanitize_replaces_special_characters() {
        assert_eq!(sanitize_key("list_prices"), "list_prices");
        assert_eq!(
            sanitize_key("parquet_https://host/a b/c.parquet"),
            "parquet_https___host_a_b_c.parquet"
        );
        assert_eq!(sanitize_key("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_key(".."), "__");
        assert_eq!(sanitize_key(""), "_");
    }

    #[test]
    fn sanitize_bounds_long_keys_without_colliding() {
        let a = format!("parquet_https://host/{}/a.parquet", "x".repeat(400));
        let b = format!("parquet_https://host/{}/b.parquet", "x".repeat(400));
        let sa = sanitize_key(&a);
        let sb = sanitize_key(&b);
        assert_eq!(sa.len(), MAX_KEY_LEN);
        assert_ne!(sa, sb);
    }

    #[test]
    fn write_then_fresh_then_stale() {
        let (_dir, cache) = cache(1);
        let path = cache.write_bytes("demo", b"content").unwrap();
        assert!(cache.is_fresh("demo"));
        assert_eq!(cache.read_bytes("demo").unwrap(), b"content");

        backdate(&path, Duration::from_secs(6));
        assert!(!cache.is_fresh("demo"));
    }

    #[test]
    fn missing_entry_is_not_found() {
        let (_dir, cache) = cache(60);
        assert!(!cache.is_fresh("nope"));
        assert!(matches!(
            cache.read_bytes("nope"),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn get_or_set_invokes_loader_once_while_fresh() {
        let (_dir, cache) = cache(60);
        let calls = Cell::new(0);
        let load = || -> Result<Vec<String>, CacheError> {
            calls.set(calls.get() + 1);
            Ok(vec!["a.parquet".to_string()])
        };

        let first: Vec<String> = cache.get_or_set_json("list_prices", load).unwrap();
        let second: Vec<String> = cache.get_or_set_json("list_prices", load).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn get_or_set_reloads_stale_entry() {
        let (_dir, cache) = cache(1);
        let path = cache.write_json("k", &1_u32).unwrap();
        backdate(&path, Duration::from_secs(10));

        let value: u32 = cache
            .get_or_set_json("k", || Ok::<_, CacheError>(2))
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.read_json::<u32>("k").unwrap(), 2);
    }

    #[test]
    fn loader_error_writes_nothing() {
        let (_dir, cache) = cache(60);
        let result: Result<u32, CacheError> = cache.get_or_set_json("k", || {
            Err(CacheError::NotFound {
                key: "upstream".into(),
            })
        });
        assert!(result.is_err());
        assert!(!cache.path_for_key("k").exists());
    }

    #[test]
    fn invalidate_only_removes_stale_entries() {
        let (_dir, cache) = cache(5);
        let stale = cache.write_bytes("stale", b"x").unwrap();
        let fresh = cache.write_bytes("fresh", b"y").unwrap();
        backdate(&stale, Duration::from_secs(60));

        cache.invalidate_if_expired(["stale", "fresh", "absent"]).unwrap();
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn purge_and_status_report_counts() {
        let (_dir, cache) = cache(5);
        let old = cache.write_bytes("old", b"1234").unwrap();
        cache.write_bytes("new", b"12").unwrap();
        backdate(&old, Duration::from_secs(60));

        let status = cache.status().unwrap();
        assert_eq!(status.entries, 2);
        assert_eq!(status.fresh, 1);
        assert_eq!(status.total_bytes, 6);

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.status().unwrap().entries, 1);
    }
}
