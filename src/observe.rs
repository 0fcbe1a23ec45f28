//! Append-only CSV event logs for a single run.
//!
//! Every file lives directly in the run's log directory and is created with a
//! header row on first write. Failures to write are reported through `tracing`
//! and never interrupt the pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;

use crate::config::Settings;

pub const HTTP_REQUESTS: &str = "http_requests.csv";
pub const DATA_OUTPUTS: &str = "data_outputs.csv";
pub const RUNS: &str = "runs.csv";
pub const STATE_CHANGES: &str = "state_changes.csv";

#[derive(Debug, Clone)]
pub struct RunLog {
    dir: Utf8PathBuf,
    enabled: bool,
    run_id: String,
    environment: String,
    trigger: String,
}

#[derive(Debug, Clone, Serialize)]
struct HttpRow<'a> {
    timestamp: String,
    run_id: &'a str,
    method: &'a str,
    url: &'a str,
    status: Option<u16>,
    duration_ms: u64,
    cached: bool,
    error: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct DataOutputRow<'a> {
    timestamp: String,
    run_id: &'a str,
    dataset: &'a str,
    mode: &'a str,
    rows: usize,
    size_bytes: usize,
    columns: String,
    null_counts: String,
}

#[derive(Debug, Clone, Serialize)]
struct RunRow<'a> {
    timestamp: String,
    run_id: &'a str,
    event: &'a str,
    status: &'a str,
    environment: &'a str,
    trigger: &'a str,
    error: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct StateChangeRow<'a> {
    timestamp: String,
    run_id: &'a str,
    asset: &'a str,
    key: &'a str,
    old_value: String,
    new_value: String,
}

#[derive(Debug, Clone)]
pub struct HttpEvent<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub cached: bool,
    pub error: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct DataOutputEvent<'a> {
    pub dataset: &'a str,
    pub mode: &'a str,
    pub rows: usize,
    pub size_bytes: usize,
    pub columns: &'a [String],
    pub null_counts: &'a BTreeMap<String, usize>,
}

impl RunLog {
    pub fn new(settings: &Settings) -> Self {
        Self {
            dir: settings.log_dir.clone(),
            enabled: settings.logging_enabled,
            run_id: settings.run_id.clone(),
            environment: settings.mode.to_string(),
            trigger: settings.trigger.clone(),
        }
    }

    pub fn for_run(dir: impl Into<Utf8PathBuf>, run_id: &str, environment: &str, trigger: &str) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
            run_id: run_id.to_string(),
            environment: environment.to_string(),
            trigger: trigger.to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: Utf8PathBuf::from("logs"),
            enabled: false,
            run_id: "unknown".to_string(),
            environment: "local".to_string(),
            trigger: "manual".to_string(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<Utf8PathBuf>, enabled: bool) -> Self {
        self.dir = dir.into();
        self.enabled = enabled;
        self
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_http_request(&self, event: &HttpEvent<'_>) {
        self.append(
            HTTP_REQUESTS,
            &HttpRow {
                timestamp: now(),
                run_id: &self.run_id,
                method: event.method,
                url: event.url,
                status: event.status,
                duration_ms: event.duration_ms,
                cached: event.cached,
                error: event.error.unwrap_or(""),
            },
        );
    }

    pub fn log_data_output(&self, event: &DataOutputEvent<'_>) {
        let null_counts = if event.null_counts.is_empty() {
            String::new()
        } else {
            serde_json::to_string(event.null_counts).unwrap_or_default()
        };
        self.append(
            DATA_OUTPUTS,
            &DataOutputRow {
                timestamp: now(),
                run_id: &self.run_id,
                dataset: event.dataset,
                mode: event.mode,
                rows: event.rows,
                size_bytes: event.size_bytes,
                columns: event.columns.join(","),
                null_counts,
            },
        );
    }

    pub fn log_run_start(&self) {
        self.log_run_event("start", "", None);
    }

    pub fn log_run_end(&self, status: &str, error: Option<&str>) {
        self.log_run_event("end", status, error);
    }

    fn log_run_event(&self, event: &str, status: &str, error: Option<&str>) {
        self.append(
            RUNS,
            &RunRow {
                timestamp: now(),
                run_id: &self.run_id,
                event,
                status,
                environment: &self.environment,
                trigger: &self.trigger,
                error: error.unwrap_or(""),
            },
        );
    }

    /// One row per top-level key whose value differs between the two documents.
    pub fn log_state_change(
        &self,
        asset: &str,
        old: &serde_json::Map<String, Value>,
        new: &serde_json::Map<String, Value>,
    ) {
        if !self.enabled {
            return;
        }
        let timestamp = now();
        let keys = old.keys().chain(new.keys()).collect::<BTreeSet<_>>();
        for key in keys {
            let old_value = old.get(key);
            let new_value = new.get(key);
            if old_value == new_value {
                continue;
            }
            self.append(
                STATE_CHANGES,
                &StateChangeRow {
                    timestamp: timestamp.clone(),
                    run_id: &self.run_id,
                    asset,
                    key,
                    old_value: old_value.map(Value::to_string).unwrap_or_default(),
                    new_value: new_value.map(Value::to_string).unwrap_or_default(),
                },
            );
        }
    }

    fn append<T: Serialize>(&self, filename: &str, row: &T) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.try_append(filename, row) {
            tracing::warn!(file = filename, error = %err, "failed to write run log");
        }
    }

    fn try_append<T: Serialize>(&self, filename: &str, row: &T) -> Result<(), String> {
        fs::create_dir_all(self.dir.as_std_path()).map_err(|err| err.to_string())?;
        let path = self.dir.join(filename);
        let exists = path.as_std_path().exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| err.to_string())?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(row).map_err(|err| err.to_string())?;
        writer.flush().map_err(|err| err.to_string())
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
