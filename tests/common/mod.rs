#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use camino::Utf8PathBuf;

use zillow_connector::app::{ProgressEvent, ProgressSink};
use zillow_connector::config::Settings;

pub const METRO_CSV: &str = "\
RegionID,SizeRank,RegionName,RegionType,StateName,2020-01-31,2020-02-29
394913,1,\"New York, NY\",msa,NY,500000.5,501000.25
753899,2,\"Los Angeles, CA\",msa,CA,700000,701500
";

/// A one-response-per-connection HTTP server on localhost.
pub struct TestServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn start(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::clone(&hits);
        let received = Arc::clone(&bodies);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                let request_body = read_request(&mut stream);
                received.lock().unwrap().push(request_body);
                let response = format!(
                    "HTTP/1.1 {status} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    reason(status),
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        Self { url, hits, bodies }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut buf).unwrap_or(0);
        if read == 0 {
            return String::new();
        }
        data.extend_from_slice(&buf[..read]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while data.len() < header_end + length {
        let read = stream.read(&mut buf).unwrap_or(0);
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buf[..read]);
    }
    String::from_utf8_lossy(&data[header_end..]).into_owned()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        409 => "Conflict",
        _ => "Error",
    }
}

pub fn local_settings(temp: &tempfile::TempDir) -> Settings {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut settings = Settings::local(root.join("data"));
    settings.log_dir = root.join("logs");
    settings
}

#[derive(Default)]
pub struct RecordingSink {
    pub lines: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.lines.lock().unwrap().push(event.message);
    }
}
