mod common;

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use common::{TestServer, local_settings};
use zillow_connector::config::RateLimit;
use zillow_connector::error::ConnectorError;
use zillow_connector::http::{HttpClient, Method, RequestOptions};
use zillow_connector::observe::{HTTP_REQUESTS, RunLog};

#[test]
fn cache_serves_repeat_requests_without_network() {
    let server = TestServer::start(200, "a,b\n1,2\n");
    let temp = tempfile::tempdir().unwrap();
    let mut settings = local_settings(&temp);
    settings.http.cache_enabled = true;

    let client = HttpClient::new(&settings.http, RunLog::disabled()).unwrap();
    let url = format!("{}/file.csv", server.url);
    let first = client.get(&url, RequestOptions::default()).unwrap();
    let second = client.get(&url, RequestOptions::default()).unwrap();

    assert_eq!(server.hits(), 1);
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.text(), "a,b\n1,2\n");
}

#[test]
fn requests_are_logged_with_status() {
    let server = TestServer::start(200, "ok");
    let temp = tempfile::tempdir().unwrap();
    let settings = local_settings(&temp);
    let log_dir = Utf8PathBuf::from_path_buf(temp.path().join("run-logs")).unwrap();
    let log = RunLog::disabled().with_dir(log_dir.clone(), true);

    let client = HttpClient::new(&settings.http, log).unwrap();
    client.get(&server.url, RequestOptions::default()).unwrap();

    let content = std::fs::read_to_string(log_dir.join(HTTP_REQUESTS).as_std_path()).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("timestamp,run_id,method,url,status"));
    assert!(lines[1].contains(",GET,"));
    assert!(lines[1].contains(",200,"));
}

#[test]
fn error_status_is_reported() {
    let server = TestServer::start(404, "missing");
    let temp = tempfile::tempdir().unwrap();
    let settings = local_settings(&temp);
    let client = HttpClient::new(&settings.http, RunLog::disabled()).unwrap();

    let response = client.get(&server.url, RequestOptions::default()).unwrap();
    assert!(!response.is_success());
    assert_matches!(
        response.error_for_status(Method::Get),
        Err(ConnectorError::HttpStatus { status: 404, .. })
    );
}

#[test]
fn full_rate_window_delays_the_next_request() {
    let server = TestServer::start(200, "ok");
    let temp = tempfile::tempdir().unwrap();
    let mut settings = local_settings(&temp);
    let period = Duration::from_millis(300);
    settings.http.rate_limit = Some(RateLimit { calls: 2, period });
    let client = HttpClient::new(&settings.http, RunLog::disabled()).unwrap();

    let started = Instant::now();
    client.get(&server.url, RequestOptions::default()).unwrap();
    client.get(&server.url, RequestOptions::default()).unwrap();
    assert!(started.elapsed() < period);
    client.get(&server.url, RequestOptions::default()).unwrap();

    assert!(started.elapsed() >= period);
    assert_eq!(server.hits(), 3);
}
