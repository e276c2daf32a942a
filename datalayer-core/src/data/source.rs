//! Object source resolution: which files make up a dataset, and where their
//! bytes can be read locally.
//!
//! Dataset layout: `{base_path}/{clean_prefix}/{dataset}/**/*.parquet`
//!
//! The file list for a dataset is cached under `list_<dataset>` with the same
//! TTL as content, so newly landed partitions stay invisible until the listing
//! expires. Remote (HTTP/HTTPS) locators are downloaded once per TTL window and
//! served from the cache under `parquet_<locator>`.

use super::cache::CacheManager;
use super::error::{DataAccessError, TransportError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for partition downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the bytes behind a remote locator.
///
/// The resolver never retries; callers retry the whole request.
pub trait RemoteFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Blocking HTTP(S) fetcher with a bounded per-request timeout.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("datalayer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else if e.is_connect() {
            TransportError::Unreachable(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status {
                status: status.as_u16(),
            }
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let resp = self.client.get(url).send().map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().map_err(|e| self.classify(e))?;
        Ok(body.to_vec())
    }
}

/// Resolves dataset names to partition files and remote locators to local paths.
pub struct SourceResolver {
    base_path: PathBuf,
    clean_prefix: String,
    cache: CacheManager,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl SourceResolver {
    pub fn new(
        base_path: impl Into<PathBuf>,
        clean_prefix: impl Into<String>,
        cache: CacheManager,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            clean_prefix: clean_prefix.into(),
            cache,
            fetcher,
        }
    }

    /// Root directory of a dataset: `{base_path}/{clean_prefix}/{dataset}`.
    pub fn dataset_root(&self, dataset: &str) -> PathBuf {
        self.base_path.join(&self.clean_prefix).join(dataset)
    }

    /// All `*.parquet` files under the dataset root, sorted, cached per TTL.
    ///
    /// A missing root is an error and is not cached, so a dataset that lands
    /// later is picked up on the next call.
    pub fn list_partition_files(&self, dataset: &str) -> Result<Vec<String>, DataAccessError> {
        let root = self.dataset_root(dataset);
        if !is_valid_dataset_name(dataset) {
            return Err(DataAccessError::DatasetNotFound {
                dataset: dataset.to_string(),
                path: root,
            });
        }

        let key = format!("list_{dataset}");
        self.cache.get_or_set_json(&key, || {
            if !root.is_dir() {
                return Err(DataAccessError::DatasetNotFound {
                    dataset: dataset.to_string(),
                    path: root.clone(),
                });
            }

            let mut files = Vec::new();
            collect_parquet_files(&root, &mut files).map_err(|e| {
                DataAccessError::Frame(format!("failed to list {}: {e}", root.display()))
            })?;
            files.sort();

            debug!(dataset, files = files.len(), "listed partition files");
            Ok(files
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect())
        })
    }

    /// Local path for a partition file, downloading remote locators into the cache.
    pub fn resolve_to_local(&self, path: &str) -> Result<PathBuf, DataAccessError> {
        let candidate = Path::new(path);
        if candidate.is_absolute() || candidate.exists() {
            return Ok(candidate.to_path_buf());
        }

        let under_base = self.base_path.join(path);
        if under_base.exists() {
            return Ok(under_base);
        }

        if !is_remote_locator(path) {
            return Err(DataAccessError::Download {
                path: path.to_string(),
                source: TransportError::Other("not a local file or an http(s) locator".into()),
            });
        }

        let key = format!("parquet_{path}");
        if self.cache.is_fresh(&key) {
            debug!(path, "serving partition from cache");
            return Ok(self.cache.path_for_key(&key));
        }

        info!(path, "downloading partition");
        let bytes = self.fetcher.fetch(path).map_err(|source| {
            warn!(path, error = %source, "partition download failed");
            DataAccessError::Download {
                path: path.to_string(),
                source,
            }
        })?;

        Ok(self.cache.write_bytes(&key, &bytes)?)
    }
}

fn collect_parquet_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_parquet_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            out.push(path);
        }
    }
    Ok(())
}

/// Dataset names are single path components: no separators, no dot segments.
fn is_valid_dataset_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

fn is_remote_locator(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        result: fn() -> Result<Vec<u8>, TransportError>,
    }

    impl RemoteFetcher for CountingFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn resolver_with(
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> (tempfile::TempDir, SourceResolver) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60)).unwrap();
        let resolver = SourceResolver::new(dir.path(), "clean", cache, fetcher);
        (dir, resolver)
    }

    fn ok_fetcher() -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            result: || Ok(b"PAR1".to_vec()),
        })
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn lists_nested_parquet_files_sorted() {
        let (dir, resolver) = resolver_with(ok_fetcher());
        let root = dir.path().join("clean/prices");
        touch(&root.join("ingest_date=2024-02-01/b.parquet"));
        touch(&root.join("ingest_date=2024-01-01/a.parquet"));
        touch(&root.join("ingest_date=2024-01-01/_SUCCESS"));

        let files = resolver.list_partition_files("prices").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.parquet"));
        assert!(files[1].ends_with("b.parquet"));
    }

    #[test]
    fn listing_is_cached_within_ttl() {
        let (dir, resolver) = resolver_with(ok_fetcher());
        let root = dir.path().join("clean/prices");
        touch(&root.join("a.parquet"));

        assert_eq!(resolver.list_partition_files("prices").unwrap().len(), 1);
        touch(&root.join("b.parquet"));
        assert_eq!(resolver.list_partition_files("prices").unwrap().len(), 1);
    }

    #[test]
    fn missing_dataset_is_reported_and_not_cached() {
        let (dir, resolver) = resolver_with(ok_fetcher());
        assert!(matches!(
            resolver.list_partition_files("missing"),
            Err(DataAccessError::DatasetNotFound { .. })
        ));

        touch(&dir.path().join("clean/missing/a.parquet"));
        assert_eq!(resolver.list_partition_files("missing").unwrap().len(), 1);
    }

    #[test]
    fn rejects_dataset_names_with_separators() {
        let (_dir, resolver) = resolver_with(ok_fetcher());
        assert!(matches!(
            resolver.list_partition_files("../secrets"),
            Err(DataAccessError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn local_paths_are_returned_as_is() {
        let fetcher = ok_fetcher();
        let (dir, resolver) = resolver_with(fetcher.clone());
        let file = dir.path().join("clean/prices/a.parquet");
        touch(&file);

        let abs = file.to_string_lossy().into_owned();
        assert_eq!(resolver.resolve_to_local(&abs).unwrap(), file);

        let relative = resolver.resolve_to_local("clean/prices/a.parquet").unwrap();
        assert_eq!(relative, dir.path().join("clean/prices/a.parquet"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remote_locator_downloads_once_per_ttl() {
        let fetcher = ok_fetcher();
        let (_dir, resolver) = resolver_with(fetcher.clone());
        let url = "https://storage.example/clean/prices/a.parquet";

        let first = resolver.resolve_to_local(url).unwrap();
        let second = resolver.resolve_to_local(url).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"PAR1");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn download_failure_wraps_transport_error() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            result: || Err(TransportError::Timeout { timeout_secs: 30 }),
        });
        let (_dir, resolver) = resolver_with(fetcher);

        let err = resolver
            .resolve_to_local("https://storage.example/x.parquet")
            .unwrap_err();
        assert!(matches!(
            err,
            DataAccessError::Download {
                source: TransportError::Timeout { .. },
                ..
            }
        ));
    }
}
