//! Static-asset proxy fetcher
//!
//! Serve-time components (the API summary proxy and the MCP tools) read
//! extracted content back out of the static tree. The tree may be a local
//! export directory or a remote HTTP host; fetches are bounded by a timeout
//! and recently fetched blobs sit in a small best-effort LRU cache.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::{Error, Result};

/// Outbound fetch timeout for summary/source proxying.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Cached asset entries; content blobs are small JSON/markdown files.
const CACHE_CAPACITY: usize = 64;

enum AssetSource {
    Local(PathBuf),
    Remote { base: String, client: reqwest::Client },
}

/// Fetches asset text by tree-relative path (`summary/<id>.json`,
/// `md/<hash>.md`, ...).
pub struct AssetFetcher {
    source: AssetSource,
    cache: Mutex<LruCache>,
}

impl AssetFetcher {
    /// `base` is either an `http(s)://` URL or a local directory path.
    pub fn new(base: &str) -> Result<Self> {
        let source = if base.starts_with("http://") || base.starts_with("https://") {
            let client = reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()?;
            AssetSource::Remote {
                base: base.trim_end_matches('/').to_string(),
                client,
            }
        } else {
            AssetSource::Local(PathBuf::from(base))
        };
        Ok(Self {
            source,
            cache: Mutex::new(LruCache::new(CACHE_CAPACITY)),
        })
    }

    /// Fetch the text content at a tree-relative path.
    pub async fn fetch_text(&self, rel_path: &str) -> Result<String> {
        if let Some(hit) = self.cache_get(rel_path) {
            return Ok(hit);
        }
        let text = match &self.source {
            AssetSource::Local(root) => {
                let path = root.join(rel_path);
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(Error::AssetMissing(rel_path.to_string()));
                    }
                    Err(e) => {
                        return Err(Error::AssetFetchFailed(format!("{rel_path}: {e}")));
                    }
                }
            }
            AssetSource::Remote { base, client } => {
                let url = format!("{base}/{rel_path}");
                let response = client.get(&url).send().await.map_err(|e| {
                    if e.is_timeout() {
                        Error::AssetFetchTimeout(rel_path.to_string())
                    } else {
                        Error::AssetFetchFailed(format!("{rel_path}: {e}"))
                    }
                })?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(Error::AssetMissing(rel_path.to_string()));
                }
                if !response.status().is_success() {
                    return Err(Error::AssetFetchFailed(format!(
                        "{rel_path}: HTTP {}",
                        response.status()
                    )));
                }
                response.text().await.map_err(|e| {
                    if e.is_timeout() {
                        Error::AssetFetchTimeout(rel_path.to_string())
                    } else {
                        Error::AssetFetchFailed(format!("{rel_path}: {e}"))
                    }
                })?
            }
        };
        self.cache_put(rel_path, &text);
        Ok(text)
    }

    /// Fetch and parse a JSON asset.
    pub async fn fetch_json(&self, rel_path: &str) -> Result<serde_json::Value> {
        let text = self.fetch_text(rel_path).await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::AssetFetchFailed(format!("{rel_path}: invalid JSON: {e}")))
    }

    fn cache_get(&self, key: &str) -> Option<String> {
        self.cache.lock().ok()?.get(key)
    }

    fn cache_put(&self, key: &str, value: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key.to_string(), value.to_string());
        }
    }
}

/// Minimal LRU: map plus recency queue. Good enough for a best-effort
/// proxy cache; hot keys are re-pushed on access and stale duplicates in
/// the queue are skipped during eviction.
struct LruCache {
    capacity: usize,
    entries: HashMap<String, String>,
    recency: VecDeque<String>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        let value = self.entries.get(key).cloned()?;
        self.recency.push_back(key.to_string());
        Some(value)
    }

    fn put(&mut self, key: String, value: String) {
        self.entries.insert(key.clone(), value);
        self.recency.push_back(key);
        while self.entries.len() > self.capacity {
            let Some(candidate) = self.recency.pop_front() else {
                break;
            };
            // Skip keys that were touched again after this queue entry.
            if self.recency.iter().any(|k| k == &candidate) {
                continue;
            }
            self.entries.remove(&candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_fetch_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("md")).unwrap();
        std::fs::write(dir.path().join("md/abc.md"), "# hello").unwrap();

        let fetcher = AssetFetcher::new(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(fetcher.fetch_text("md/abc.md").await.unwrap(), "# hello");
        let err = fetcher.fetch_text("md/nope.md").await.unwrap_err();
        assert_eq!(err.code(), "asset_missing");
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let mut cache = LruCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        assert!(cache.get("a").is_some()); // refresh a
        cache.put("c".into(), "3".into());
        assert!(cache.entries.len() <= 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
