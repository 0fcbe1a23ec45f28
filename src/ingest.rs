//! Download phase: fetch every (dataset, region) CSV that is not yet checkpointed.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{DatasetDescriptor, RegionType};
use crate::error::ConnectorError;
use crate::http::{HttpClient, Method, RequestOptions};
use crate::store::{RawStore, StateStore};

pub const STATE_ASSET: &str = "zillow_ingest";
pub const COMPLETED_KEY: &str = "completed";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

pub trait CsvSource {
    fn fetch_csv(&self, url: &str, timeout: Duration) -> Result<String, ConnectorError>;
}

impl CsvSource for HttpClient {
    fn fetch_csv(&self, url: &str, timeout: Duration) -> Result<String, ConnectorError> {
        let response = self
            .get(url, RequestOptions::default().timeout(timeout))?
            .error_for_status(Method::Get)?;
        Ok(response.text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTask {
    pub dataset: &'static DatasetDescriptor,
    pub region: RegionType,
    pub asset_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub planned: usize,
    pub saved: Vec<String>,
    pub failed: Vec<FailedDownload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    pub asset_id: String,
    pub error: String,
}

pub fn completed_assets(state: &Map<String, Value>) -> BTreeSet<String> {
    state
        .get(COMPLETED_KEY)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Every (dataset, region) pair not yet recorded as completed, in catalog order.
pub fn pending(
    datasets: &'static [DatasetDescriptor],
    regions: &[RegionType],
    completed: &BTreeSet<String>,
) -> Vec<IngestTask> {
    datasets
        .iter()
        .flat_map(|dataset| {
            regions.iter().map(move |region| IngestTask {
                dataset,
                region: *region,
                asset_id: dataset.asset_id(*region),
            })
        })
        .filter(|task| !completed.contains(&task.asset_id))
        .collect()
}

pub struct Ingest<'a, S: CsvSource + ?Sized> {
    pub source: &'a S,
    pub raw: &'a RawStore,
    pub state: &'a StateStore,
    pub base_url: &'a str,
}

impl<S: CsvSource + ?Sized> Ingest<'_, S> {
    pub fn run(
        &self,
        datasets: &'static [DatasetDescriptor],
        regions: &[RegionType],
        sink: &dyn ProgressSink,
    ) -> Result<IngestReport, ConnectorError> {
        let mut completed = completed_assets(&self.state.load_state(STATE_ASSET)?);
        let tasks = pending(datasets, regions, &completed);
        let mut report = IngestReport {
            planned: tasks.len(),
            ..Default::default()
        };
        if tasks.is_empty() {
            sink.event(ProgressEvent::message("All datasets up to date"));
            return Ok(report);
        }
        sink.event(ProgressEvent::message(format!("Fetching {} files...", tasks.len())));

        let total = tasks.len();
        for (index, task) in tasks.iter().enumerate() {
            sink.event(ProgressEvent::message(format!(
                "[{}/{total}] {} ({})...",
                index + 1,
                task.dataset.id,
                task.region.file_token()
            )));
            let started = Instant::now();
            match self.fetch_one(task) {
                Ok(bytes) => {
                    completed.insert(task.asset_id.clone());
                    self.checkpoint(&completed)?;
                    sink.event(ProgressEvent {
                        message: format!("  -> saved ({bytes} bytes)"),
                        elapsed: Some(started.elapsed()),
                    });
                    report.saved.push(task.asset_id.clone());
                }
                Err(err) => {
                    tracing::warn!(asset = %task.asset_id, error = %err, "download failed, continuing");
                    sink.event(ProgressEvent::message(format!("  -> FAILED: {err}")));
                    report.failed.push(FailedDownload {
                        asset_id: task.asset_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            "ingest finished"
        );
        Ok(report)
    }

    fn fetch_one(&self, task: &IngestTask) -> Result<usize, ConnectorError> {
        let url = task.dataset.url(self.base_url, task.region);
        let text = self.source.fetch_csv(&url, FETCH_TIMEOUT)?;
        self.raw.save_raw_file(text.as_bytes(), &task.asset_id, "csv")?;
        Ok(text.len())
    }

    fn checkpoint(&self, completed: &BTreeSet<String>) -> Result<(), ConnectorError> {
        let mut state = self.state.load_state(STATE_ASSET)?;
        state.insert(
            COMPLETED_KEY.to_string(),
            Value::Array(completed.iter().cloned().map(Value::String).collect()),
        );
        self.state.save_state(STATE_ASSET, state)?;
        Ok(())
    }
}
