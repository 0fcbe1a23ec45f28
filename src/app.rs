use std::time::Duration;

use serde::Serialize;

use crate::config::Settings;
use crate::domain::{BASE_URL, DATASETS, RegionType};
use crate::error::ConnectorError;
use crate::http::HttpClient;
use crate::ingest::{CsvSource, Ingest, IngestReport};
use crate::observe::RunLog;
use crate::store::{RawStore, StateStore};
use crate::transform::{FAMILIES, Transform, TransformReport};
use crate::warehouse::TableSink;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Which phases a run executes. Both flags off runs everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub ingest: bool,
    pub transform: bool,
}

impl Phases {
    pub fn from_flags(ingest_only: bool, transform_only: bool) -> Self {
        Self {
            ingest: !transform_only,
            transform: !ingest_only,
        }
    }
}

impl Default for Phases {
    fn default() -> Self {
        Self::from_flags(false, false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub ingest: Option<IngestReport>,
    pub transform: Option<TransformReport>,
}

impl RunSummary {
    /// Fails when any transform slice failed; the summary itself stays intact.
    pub fn check(&self) -> Result<(), ConnectorError> {
        match &self.transform {
            Some(report) => report.check(),
            None => Ok(()),
        }
    }
}

/// Everything a run needs, built once from resolved settings.
pub struct Pipeline {
    settings: Settings,
    log: RunLog,
    http: HttpClient,
    raw: RawStore,
    state: StateStore,
    sink: TableSink,
}

impl Pipeline {
    pub fn from_settings(settings: Settings) -> Result<Self, ConnectorError> {
        let log = RunLog::new(&settings);
        let http = HttpClient::new(&settings.http, log.clone())?;
        let raw = RawStore::from_settings(&settings)?;
        let state = StateStore::from_settings(&settings, log.clone())?;
        let sink = TableSink::from_settings(&settings, log.clone())?;
        tracing::info!(
            mode = %settings.mode,
            backend = %settings.backend,
            run_id = %settings.run_id,
            "pipeline configured"
        );
        Ok(Self {
            settings,
            log,
            http,
            raw,
            state,
            sink,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn raw(&self) -> &RawStore {
        &self.raw
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn sink(&self) -> &TableSink {
        &self.sink
    }

    pub fn run(&self, phases: Phases, progress: &dyn ProgressSink) -> Result<RunSummary, ConnectorError> {
        self.run_with(&self.http, phases, progress)
    }

    /// Runs the selected phases with `source` serving the downloads.
    ///
    /// Failed transform slices do not make this return `Err`; they are in the
    /// summary and reported by [`RunSummary::check`].
    pub fn run_with<S: CsvSource + ?Sized>(
        &self,
        source: &S,
        phases: Phases,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary, ConnectorError> {
        self.log.log_run_start();
        let result = self.execute(source, phases, progress);
        let failure = match &result {
            Ok(summary) => summary.check().err().map(|err| err.to_string()),
            Err(err) => Some(err.to_string()),
        };
        match failure {
            None => self.log.log_run_end("success", None),
            Some(error) => self.log.log_run_end("failed", Some(&error)),
        }
        result
    }

    fn execute<S: CsvSource + ?Sized>(
        &self,
        source: &S,
        phases: Phases,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary, ConnectorError> {
        let mut summary = RunSummary {
            run_id: self.settings.run_id.clone(),
            ingest: None,
            transform: None,
        };

        if phases.ingest {
            progress.event(ProgressEvent::message("=== Phase 1: Ingest ==="));
            let ingest = Ingest {
                source,
                raw: &self.raw,
                state: &self.state,
                base_url: BASE_URL,
            };
            summary.ingest = Some(ingest.run(&DATASETS, &RegionType::ALL, progress)?);
        }

        if phases.transform {
            progress.event(ProgressEvent::message("=== Phase 2: Transform ==="));
            let transform = Transform {
                raw: &self.raw,
                sink: &self.sink,
            };
            let report = transform.run(&FAMILIES, &RegionType::ALL, progress);
            tracing::info!(
                written = report.written(),
                failed = report.failed(),
                slices = report.slices.len(),
                "transform finished"
            );
            summary.transform = Some(report);
        }
        Ok(summary)
    }
}
