use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConnectorError;
use crate::http::HttpResponse;
use crate::fs_util::{write_bytes_atomic, write_json_atomic};

const STRIPPED_HEADERS: [&str; 2] = ["content-encoding", "transfer-encoding"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub url: String,
    pub method: String,
    pub cached_at: String,
}

/// On-disk response cache: `{key}.bin` holds the body, `{key}.meta.json` the rest.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: Utf8PathBuf,
}

impl ResponseCache {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Result<Self, ConnectorError> {
        let dir = dir.into();
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn key(method: &str, url: &str, params: &[(String, String)]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        if !params.is_empty() {
            let mut sorted = params.to_vec();
            sorted.sort();
            let encoded = serde_json::to_string(&sorted).unwrap_or_default();
            hasher.update(encoded.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Result<Option<HttpResponse>, ConnectorError> {
        let (meta_path, body_path) = self.paths(key);
        if !meta_path.as_std_path().exists() || !body_path.as_std_path().exists() {
            return Ok(None);
        }
        let meta = fs::read_to_string(meta_path.as_std_path())
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        let mut meta: CacheMetadata = serde_json::from_str(&meta)?;
        let body = fs::read(body_path.as_std_path())
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        for header in STRIPPED_HEADERS {
            meta.headers.remove(header);
        }
        Ok(Some(HttpResponse {
            status: meta.status_code,
            headers: meta.headers,
            body,
            url: meta.url,
            cached: true,
        }))
    }

    pub fn save(
        &self,
        key: &str,
        method: &str,
        response: &HttpResponse,
    ) -> Result<(), ConnectorError> {
        let (meta_path, body_path) = self.paths(key);
        write_bytes_atomic(&body_path, &response.body)?;
        let meta = CacheMetadata {
            status_code: response.status,
            headers: response.headers.clone(),
            url: response.url.clone(),
            method: method.to_string(),
            cached_at: chrono::Utc::now().to_rfc3339(),
        };
        write_json_atomic(&meta_path, &meta)
    }

    fn paths(&self, key: &str) -> (Utf8PathBuf, Utf8PathBuf) {
        (
            self.dir.join(format!("{key}.meta.json")),
            self.dir.join(format!("{key}.bin")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_param_order() {
        let a = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        let b = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        assert_eq!(
            ResponseCache::key("GET", "https://example.org", &a),
            ResponseCache::key("GET", "https://example.org", &b)
        );
        assert_ne!(
            ResponseCache::key("GET", "https://example.org", &a),
            ResponseCache::key("POST", "https://example.org", &a)
        );
    }

    #[test]
    fn method_and_url_do_not_run_together() {
        assert_ne!(
            ResponseCache::key("GE", "Thttp://x", &[]),
            ResponseCache::key("GET", "http://x", &[])
        );
    }

    #[test]
    fn round_trips_response_without_encoding_headers() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
        let cache = ResponseCache::new(dir).unwrap();
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/csv".to_string());
        headers.insert("content-encoding".to_string(), "gzip".to_string());
        let response = HttpResponse {
            status: 200,
            headers,
            body: b"a,b\n1,2\n".to_vec(),
            url: "https://example.org/x.csv".to_string(),
            cached: false,
        };

        let key = ResponseCache::key("GET", &response.url, &[]);
        assert!(cache.get(&key).unwrap().is_none());
        cache.save(&key, "GET", &response).unwrap();

        let hit = cache.get(&key).unwrap().unwrap();
        assert!(hit.cached);
        assert_eq!(hit.body, response.body);
        assert_eq!(hit.headers.get("content-type").unwrap(), "text/csv");
        assert!(!hit.headers.contains_key("content-encoding"));
    }
}
