use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::ResponseCache;
use crate::config::{HttpSettings, RateLimit};
use crate::error::ConnectorError;
use crate::observe::{HttpEvent, RunLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, ConnectorError> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub url: String,
    pub cached: bool,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ConnectorError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn error_for_status(self, method: Method) -> Result<Self, ConnectorError> {
        if self.status >= 400 {
            return Err(ConnectorError::HttpStatus {
                method: method.to_string(),
                url: self.url,
                status: self.status,
            });
        }
        Ok(self)
    }
}

/// Sliding-window limiter: at most `calls` requests start within any `period`.
#[derive(Debug)]
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            calls: limit.calls.max(1) as usize,
            period: limit.period,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Blocks the calling thread until a slot is free, then claims it.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self
                    .window
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let now = Instant::now();
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= self.period {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < self.calls {
                    window.push_back(now);
                    return;
                }
                match window.front() {
                    Some(front) => self.period.saturating_sub(now.duration_since(*front)),
                    None => Duration::ZERO,
                }
            };
            thread::sleep(wait);
        }
    }
}

pub struct HttpClient {
    client: Client,
    cache: Option<ResponseCache>,
    limiter: Option<RateLimiter>,
    log: RunLog,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings, log: RunLog) -> Result<Self, ConnectorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| ConnectorError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| ConnectorError::Http(err.to_string()))?;
        let cache = if settings.cache_enabled {
            Some(ResponseCache::new(settings.cache_dir.clone())?)
        } else {
            None
        };
        Ok(Self {
            client,
            cache,
            limiter: settings.rate_limit.map(RateLimiter::new),
            log,
        })
    }

    pub fn get(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, ConnectorError> {
        self.request(Method::Get, url, options)
    }

    pub fn post(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, ConnectorError> {
        self.request(Method::Post, url, options)
    }

    pub fn put(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, ConnectorError> {
        self.request(Method::Put, url, options)
    }

    pub fn delete(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, ConnectorError> {
        self.request(Method::Delete, url, options)
    }

    pub fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, ConnectorError> {
        let started = Instant::now();
        let cache_key = self
            .cache
            .as_ref()
            .map(|_| ResponseCache::key(method.as_str(), url, &options.params));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key)? {
                tracing::debug!(%method, url, "served from response cache");
                self.record(method, url, Some(hit.status), started, true, None);
                return Ok(hit);
            }
        }

        let result = self.send(method, url, &options);
        match &result {
            Ok(response) => {
                self.record(method, url, Some(response.status), started, false, None);
            }
            Err(err) => {
                let message = err.to_string();
                self.record(method, url, None, started, false, Some(&message));
            }
        }
        let response = result?;

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if response.status < 400 {
                cache.save(key, method.as_str(), &response)?;
            }
        }
        Ok(response)
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, ConnectorError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire();
        }

        let mut request = self.client.request(method.to_reqwest(), url);
        if !options.params.is_empty() {
            request = request.query(&options.params);
        }
        if !options.headers.is_empty() {
            let mut headers = HeaderMap::new();
            for (name, value) in &options.headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|err| ConnectorError::Http(err.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|err| ConnectorError::Http(err.to_string()))?;
                headers.insert(name, value);
            }
            request = request.headers(headers);
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .map_err(|err| ConnectorError::Http(err.to_string()))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect::<BTreeMap<_, _>>();
        let body = response
            .bytes()
            .map_err(|err| ConnectorError::Http(err.to_string()))?
            .to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
            url: final_url,
            cached: false,
        })
    }

    fn record(
        &self,
        method: Method,
        url: &str,
        status: Option<u16>,
        started: Instant,
        cached: bool,
        error: Option<&str>,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(error) = error {
            tracing::warn!(%method, url, duration_ms, error, "request failed");
        }
        self.log.log_http_request(&HttpEvent {
            method: method.as_str(),
            url,
            status,
            duration_ms,
            cached,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_blocks_once_window_is_full() {
        let limiter = RateLimiter::new(RateLimit {
            calls: 2,
            period: Duration::from_millis(200),
        });
        let started = Instant::now();
        limiter.acquire();
        limiter.acquire();
        assert!(started.elapsed() < Duration::from_millis(100));
        limiter.acquire();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn error_for_status_rejects_client_errors() {
        let response = HttpResponse {
            status: 404,
            headers: BTreeMap::new(),
            body: Vec::new(),
            url: "https://example.org/missing".to_string(),
            cached: false,
        };
        let err = response.error_for_status(Method::Get).unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
