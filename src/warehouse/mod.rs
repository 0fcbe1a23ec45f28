//! Versioned table storage behind one interface, plus upload/publish helpers.

mod catalog;
mod files;
mod platform;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

pub use catalog::CatalogTables;
pub use files::{DataFile, FileTables, Manifest};
pub use platform::{PlatformClient, PublishOutcome};

use crate::blob::BlobStore;
use crate::config::{BackendKind, Settings};
use crate::error::ConnectorError;
use crate::observe::{DataOutputEvent, RunLog};
use crate::table::{Field, Table, unify_schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Overwrite,
    Merge,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
            WriteMode::Merge => "merge",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = ConnectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            "merge" => Ok(WriteMode::Merge),
            other => Err(ConnectorError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub version: i64,
    pub rows: usize,
    pub files: usize,
    pub schema: Vec<Field>,
    pub description: Option<String>,
    pub updated_at: String,
}

pub trait TableStore {
    /// Writes `table` into `dataset` and returns the table location.
    fn write(
        &self,
        dataset: &str,
        table: &Table,
        mode: WriteMode,
        merge_key: &[String],
    ) -> Result<String, ConnectorError>;
    fn load(&self, dataset: &str) -> Result<Option<Table>, ConnectorError>;
    fn set_description(&self, dataset: &str, description: &str) -> Result<(), ConnectorError>;
    fn snapshot(&self, dataset: &str) -> Result<Option<SnapshotInfo>, ConnectorError>;
}

/// Outcome of combining an incoming table with what is already stored.
pub(crate) struct WritePlan {
    pub schema: Vec<Field>,
    pub part: Table,
    pub keep_existing_files: bool,
    pub created: bool,
}

pub(crate) fn plan_write<F>(
    current_schema: Option<&[Field]>,
    load_existing: F,
    incoming: &Table,
    mode: WriteMode,
    merge_key: &[String],
) -> Result<WritePlan, ConnectorError>
where
    F: FnOnce() -> Result<Table, ConnectorError>,
{
    let Some(current_schema) = current_schema else {
        return Ok(WritePlan {
            schema: incoming.schema(),
            part: incoming.clone(),
            keep_existing_files: false,
            created: true,
        });
    };
    match mode {
        WriteMode::Append => Ok(WritePlan {
            schema: unify_schema(current_schema, &incoming.schema())?,
            part: incoming.clone(),
            keep_existing_files: true,
            created: false,
        }),
        WriteMode::Overwrite => Ok(WritePlan {
            schema: incoming.schema(),
            part: incoming.clone(),
            keep_existing_files: false,
            created: false,
        }),
        WriteMode::Merge => {
            let merged = load_existing()?.upsert(incoming, merge_key)?;
            Ok(WritePlan {
                schema: merged.schema(),
                part: merged,
                keep_existing_files: false,
                created: false,
            })
        }
    }
}

#[derive(Debug)]
pub enum Warehouse {
    Local(FileTables),
    Remote(FileTables),
    Catalog(CatalogTables),
}

impl Warehouse {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConnectorError> {
        match settings.backend {
            BackendKind::Local => Ok(Warehouse::Local(FileTables::new(
                BlobStore::local(settings.data_dir.clone()),
                "subsets",
            ))),
            BackendKind::Remote => {
                let store = BlobStore::remote(settings)?.ok_or_else(|| {
                    ConnectorError::MissingEnv {
                        mode: settings.mode.to_string(),
                        missing: vec!["R2_ACCOUNT_ID".to_string()],
                    }
                })?;
                Ok(Warehouse::Remote(FileTables::new(
                    store,
                    format!("{}/data/subsets", settings.connector),
                )))
            }
            BackendKind::Catalog => {
                let catalog = settings.catalog.as_ref().ok_or_else(|| {
                    ConnectorError::MissingEnv {
                        mode: settings.mode.to_string(),
                        missing: vec!["SUBSETS_API_KEY".to_string(), "SUBSETS_WAREHOUSE".to_string()],
                    }
                })?;
                Ok(Warehouse::Catalog(CatalogTables::open(
                    &catalog.database,
                    &catalog.warehouse,
                    &settings.connector,
                    catalog.continue_on_snapshot_error,
                )?))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Warehouse::Local(_) => BackendKind::Local,
            Warehouse::Remote(_) => BackendKind::Remote,
            Warehouse::Catalog(_) => BackendKind::Catalog,
        }
    }

    fn inner(&self) -> &dyn TableStore {
        match self {
            Warehouse::Local(tables) | Warehouse::Remote(tables) => tables,
            Warehouse::Catalog(tables) => tables,
        }
    }
}

impl TableStore for Warehouse {
    fn write(
        &self,
        dataset: &str,
        table: &Table,
        mode: WriteMode,
        merge_key: &[String],
    ) -> Result<String, ConnectorError> {
        self.inner().write(dataset, table, mode, merge_key)
    }

    fn load(&self, dataset: &str) -> Result<Option<Table>, ConnectorError> {
        self.inner().load(dataset)
    }

    fn set_description(&self, dataset: &str, description: &str) -> Result<(), ConnectorError> {
        self.inner().set_description(dataset, description)
    }

    fn snapshot(&self, dataset: &str) -> Result<Option<SnapshotInfo>, ConnectorError> {
        self.inner().snapshot(dataset)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub column_descriptions: BTreeMap<String, String>,
}

/// Entry point the pipeline writes through: validates arguments, writes, profiles and publishes.
pub struct TableSink {
    warehouse: Warehouse,
    log: RunLog,
    platform: Option<PlatformClient>,
}

impl TableSink {
    pub fn new(warehouse: Warehouse, log: RunLog) -> Self {
        Self {
            warehouse,
            log,
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: PlatformClient) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn from_settings(settings: &Settings, log: RunLog) -> Result<Self, ConnectorError> {
        let warehouse = Warehouse::from_settings(settings)?;
        let mut sink = Self::new(warehouse, log.clone());
        if let Some(catalog) = &settings.catalog {
            if sink.warehouse.kind() == BackendKind::Catalog {
                sink = sink.with_platform(PlatformClient::new(
                    &catalog.api_url,
                    &catalog.api_key,
                    &settings.connector,
                    log,
                )?);
            }
        }
        Ok(sink)
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn upload(
        &self,
        table: &Table,
        dataset: &str,
        mode: &str,
        merge_key: Option<&str>,
    ) -> Result<String, ConnectorError> {
        let mode = mode.parse::<WriteMode>()?;
        let key = match (mode, merge_key.map(str::trim).filter(|key| !key.is_empty())) {
            (WriteMode::Merge, None) => return Err(ConnectorError::MissingMergeKey),
            (WriteMode::Merge, Some(key)) => key
                .split(',')
                .map(|column| column.trim().to_string())
                .filter(|column| !column.is_empty())
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        if let Some(column) = key.iter().find(|column| !table.has_column(column)) {
            return Err(ConnectorError::MergeKeyColumn(column.clone()));
        }
        if mode == WriteMode::Overwrite {
            tracing::warn!(dataset, "overwriting table, all existing rows will be replaced");
        }
        if table.is_empty() {
            tracing::info!(dataset, "no data to upload");
            return Ok(String::new());
        }

        let profile = table.profile();
        tracing::info!(
            dataset,
            mode = %mode,
            rows = profile.rows,
            columns = profile.columns.len(),
            size_mb = %format!("{:.2}", profile.size_bytes as f64 / 1024.0 / 1024.0),
            "writing table"
        );
        let location = self.warehouse.write(dataset, table, mode, &key)?;

        self.log.log_data_output(&DataOutputEvent {
            dataset,
            mode: mode.as_str(),
            rows: profile.rows,
            size_bytes: profile.size_bytes,
            columns: &profile.columns,
            null_counts: &profile.null_counts,
        });
        Ok(location)
    }

    pub fn publish(&self, dataset: &str, metadata: &DatasetMetadata) -> Result<(), ConnectorError> {
        if metadata.id.trim().is_empty() {
            return Err(ConnectorError::MissingMetadataField("id".to_string()));
        }
        if metadata.title.trim().is_empty() {
            return Err(ConnectorError::MissingMetadataField("title".to_string()));
        }
        let snapshot = self
            .warehouse
            .snapshot(dataset)?
            .ok_or_else(|| ConnectorError::TableNotFound(dataset.to_string()))?;
        let invalid = metadata
            .column_descriptions
            .keys()
            .filter(|column| !snapshot.schema.iter().any(|field| &field.name == *column))
            .cloned()
            .collect::<Vec<_>>();
        if !invalid.is_empty() {
            return Err(ConnectorError::InvalidDescriptionColumns(invalid));
        }

        let description = serde_json::to_string(metadata)?;
        self.warehouse.set_description(dataset, &description)?;
        tracing::info!(dataset, "published metadata");

        if let Some(platform) = &self.platform {
            match platform.publish(dataset, metadata) {
                Ok(outcome) => tracing::info!(dataset, outcome = ?outcome, "platform publish"),
                Err(err) => tracing::error!(dataset, error = %err, "platform publish failed"),
            }
        }
        Ok(())
    }

    /// True when nothing is stored yet or the stored rows, schema or values differ.
    pub fn has_changed(&self, table: &Table, dataset: &str) -> bool {
        match self.warehouse.load(dataset) {
            Ok(Some(existing)) => {
                existing.num_rows() != table.num_rows()
                    || existing.schema() != table.schema()
                    || existing != *table
            }
            Ok(None) => true,
            Err(err) => {
                tracing::debug!(dataset, error = %err, "treating unreadable table as changed");
                true
            }
        }
    }

    pub fn load_asset(&self, dataset: &str) -> Result<Table, ConnectorError> {
        self.warehouse
            .load(dataset)?
            .ok_or_else(|| ConnectorError::TableNotFound(dataset.to_string()))
    }
}

pub(crate) fn part_name(version: i64) -> String {
    format!("part-{version:05}-{}.parquet", uuid::Uuid::new_v4())
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn warehouse_dir(database: &Utf8Path) -> Utf8PathBuf {
    database
        .parent()
        .map(|parent| parent.join("warehouse"))
        .unwrap_or_else(|| Utf8PathBuf::from("warehouse"))
}
