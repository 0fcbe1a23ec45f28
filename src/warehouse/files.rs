use serde::{Deserialize, Serialize};

use super::{SnapshotInfo, TableStore, WriteMode, now, part_name, plan_write};
use crate::blob::{BlobStore, ObjectStore};
use crate::columnar::{self, FileMetadata};
use crate::error::ConnectorError;
use crate::table::{Field, Table};

const MANIFEST: &str = "_manifest.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub path: String,
    pub rows: usize,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schema: Vec<Field>,
    pub version: i64,
    pub files: Vec<DataFile>,
    pub updated_at: String,
}

impl Manifest {
    pub fn rows(&self) -> usize {
        self.files.iter().map(|file| file.rows).sum()
    }
}

/// Tables kept as a JSON manifest plus immutable parquet parts under `{prefix}/{dataset}/`.
#[derive(Debug, Clone)]
pub struct FileTables {
    store: BlobStore,
    prefix: String,
}

impl FileTables {
    pub fn new(store: BlobStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn location(&self, dataset: &str) -> String {
        self.store.uri(&self.table_key(dataset))
    }

    fn table_key(&self, dataset: &str) -> String {
        format!("{}/{dataset}", self.prefix)
    }

    fn file_key(&self, dataset: &str, file: &str) -> String {
        format!("{}/{file}", self.table_key(dataset))
    }

    pub fn manifest(&self, dataset: &str) -> Result<Option<Manifest>, ConnectorError> {
        match self.store.get(&self.file_key(dataset, MANIFEST))? {
            Some(content) => Ok(Some(serde_json::from_slice(&content)?)),
            None => Ok(None),
        }
    }

    fn save_manifest(&self, dataset: &str, manifest: &Manifest) -> Result<(), ConnectorError> {
        let content = serde_json::to_vec_pretty(manifest)?;
        self.store.put(&self.file_key(dataset, MANIFEST), &content)?;
        Ok(())
    }

    fn read(&self, dataset: &str, manifest: &Manifest) -> Result<Table, ConnectorError> {
        let mut table = Table::empty(&manifest.schema);
        for file in &manifest.files {
            let content = self
                .store
                .get(&self.file_key(dataset, &file.path))?
                .ok_or_else(|| {
                    ConnectorError::TableNotFound(format!("{dataset} (missing part {})", file.path))
                })?;
            let (part, _) = columnar::decode(content)?;
            table = table.concat(&part.conform(&manifest.schema)?)?;
        }
        Ok(table)
    }
}

impl TableStore for FileTables {
    fn write(
        &self,
        dataset: &str,
        table: &Table,
        mode: WriteMode,
        merge_key: &[String],
    ) -> Result<String, ConnectorError> {
        let current = self.manifest(dataset)?;
        let plan = plan_write(
            current.as_ref().map(|manifest| manifest.schema.as_slice()),
            || match &current {
                Some(manifest) => self.read(dataset, manifest),
                None => Ok(Table::default()),
            },
            table,
            mode,
            merge_key,
        )?;

        let version = current.as_ref().map(|m| m.version + 1).unwrap_or(0);
        let path = part_name(version);
        let content = columnar::encode(&plan.part, &FileMetadata::new())?;
        self.store.put(&self.file_key(dataset, &path), &content)?;

        let mut files = match (&current, plan.keep_existing_files) {
            (Some(manifest), true) => manifest.files.clone(),
            _ => Vec::new(),
        };
        files.push(DataFile {
            path,
            rows: plan.part.num_rows(),
            size_bytes: content.len(),
        });
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            name: dataset.to_string(),
            description: current.as_ref().and_then(|m| m.description.clone()),
            schema: plan.schema,
            version,
            files,
            updated_at: now(),
        };
        self.save_manifest(dataset, &manifest)?;

        if let Some(previous) = &current {
            if !plan.keep_existing_files {
                for file in &previous.files {
                    if let Err(err) = self.store.delete(&self.file_key(dataset, &file.path)) {
                        tracing::warn!(dataset, file = %file.path, error = %err, "failed to remove replaced part");
                    }
                }
            }
        }
        if plan.created {
            tracing::info!(dataset, "created new table");
        } else {
            tracing::info!(dataset, version, rows = manifest.rows(), "table updated");
        }
        Ok(self.location(dataset))
    }

    fn load(&self, dataset: &str) -> Result<Option<Table>, ConnectorError> {
        match self.manifest(dataset)? {
            Some(manifest) => self.read(dataset, &manifest).map(Some),
            None => Ok(None),
        }
    }

    fn set_description(&self, dataset: &str, description: &str) -> Result<(), ConnectorError> {
        let mut manifest = self
            .manifest(dataset)?
            .ok_or_else(|| ConnectorError::TableNotFound(dataset.to_string()))?;
        manifest.description = Some(description.to_string());
        manifest.updated_at = now();
        self.save_manifest(dataset, &manifest)
    }

    fn snapshot(&self, dataset: &str) -> Result<Option<SnapshotInfo>, ConnectorError> {
        Ok(self.manifest(dataset)?.map(|manifest| SnapshotInfo {
            version: manifest.version,
            rows: manifest.rows(),
            files: manifest.files.len(),
            description: manifest.description.clone(),
            updated_at: manifest.updated_at.clone(),
            schema: manifest.schema,
        }))
    }
}
