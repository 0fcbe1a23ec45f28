use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::blob::{BlobStore, ObjectStore};
use crate::columnar::{self, FileMetadata};
use crate::config::Settings;
use crate::error::ConnectorError;
use crate::observe::RunLog;
use crate::table::Table;

const METADATA_KEY: &str = "connector_metadata";

/// Landing area for source payloads, keyed by asset id and extension.
#[derive(Debug, Clone)]
pub struct RawStore {
    store: BlobStore,
    prefix: String,
}

impl RawStore {
    pub fn new(store: BlobStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// `{data_dir}/raw` locally, `{connector}/data/raw` in the bucket in cloud mode.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConnectorError> {
        if settings.is_cloud() {
            if let Some(store) = BlobStore::remote(settings)? {
                return Ok(Self::new(store, format!("{}/data/raw", settings.connector)));
            }
        }
        Ok(Self::new(BlobStore::local(settings.data_dir.clone()), "raw"))
    }

    pub fn key(&self, asset_id: &str, ext: &str) -> String {
        format!("{}/{asset_id}.{ext}", self.prefix)
    }

    pub fn save_raw_file(
        &self,
        content: &[u8],
        asset_id: &str,
        ext: &str,
    ) -> Result<String, ConnectorError> {
        let uri = self.store.put(&self.key(asset_id, ext), content)?;
        tracing::info!(asset = asset_id, bytes = content.len(), uri = %uri, "saved raw file");
        Ok(uri)
    }

    pub fn load_raw_file(&self, asset_id: &str, ext: &str) -> Result<Vec<u8>, ConnectorError> {
        self.store
            .get(&self.key(asset_id, ext))?
            .ok_or_else(|| ConnectorError::RawNotFound(format!("{asset_id}.{ext}")))
    }

    pub fn load_raw_text(&self, asset_id: &str, ext: &str) -> Result<String, ConnectorError> {
        let bytes = self.load_raw_file(asset_id, ext)?;
        Ok(String::from_utf8(bytes)
            .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned()))
    }

    pub fn save_raw_json<T: Serialize>(
        &self,
        value: &T,
        asset_id: &str,
        compress: bool,
    ) -> Result<String, ConnectorError> {
        let content = serde_json::to_vec(value)?;
        if !compress {
            return self.save_raw_file(&content, asset_id, "json");
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&content)
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        self.save_raw_file(&compressed, asset_id, "json.gz")
    }

    /// Reads `{asset}.json`, falling back to the gzip variant.
    pub fn load_raw_json<T: DeserializeOwned>(&self, asset_id: &str) -> Result<T, ConnectorError> {
        if let Some(content) = self.store.get(&self.key(asset_id, "json"))? {
            return Ok(serde_json::from_slice(&content)?);
        }
        let compressed = self
            .store
            .get(&self.key(asset_id, "json.gz"))?
            .ok_or_else(|| ConnectorError::RawNotFound(format!("{asset_id}.json")))?;
        let mut content = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut content)
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn save_raw_parquet(
        &self,
        table: &Table,
        asset_id: &str,
        metadata: Option<&Value>,
    ) -> Result<String, ConnectorError> {
        let mut file_metadata = FileMetadata::new();
        if let Some(metadata) = metadata {
            file_metadata.insert(METADATA_KEY.to_string(), serde_json::to_string(metadata)?);
        }
        let content = columnar::encode(table, &file_metadata)?;
        let key = self.key(asset_id, "parquet");

        let uri = if self.store.is_remote() {
            let mut temp = tempfile::Builder::new()
                .suffix(".parquet")
                .tempfile()
                .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
            temp.write_all(&content)
                .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
            temp.flush()
                .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
            self.store.put_file(&key, temp.path())?
        } else {
            self.store.put(&key, &content)?
        };
        tracing::info!(asset = asset_id, rows = table.num_rows(), uri = %uri, "saved raw table");
        Ok(uri)
    }

    pub fn load_raw_parquet(&self, asset_id: &str) -> Result<(Table, Option<Value>), ConnectorError> {
        let content = self.load_raw_file(asset_id, "parquet")?;
        let (table, metadata) = columnar::decode(content)?;
        let metadata = metadata
            .get(METADATA_KEY)
            .map(|raw| serde_json::from_str(raw))
            .transpose()?;
        Ok((table, metadata))
    }
}

/// Per-asset JSON documents that survive between runs.
#[derive(Debug, Clone)]
pub struct StateStore {
    store: BlobStore,
    prefix: String,
    log: RunLog,
    run_id: String,
}

impl StateStore {
    pub fn new(store: BlobStore, prefix: impl Into<String>, log: RunLog, run_id: &str) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            log,
            run_id: run_id.to_string(),
        }
    }

    /// `.state/{environment}` in the working directory locally, `{connector}/data/state` in the bucket.
    pub fn from_settings(settings: &Settings, log: RunLog) -> Result<Self, ConnectorError> {
        if settings.is_cloud() {
            if let Some(store) = BlobStore::remote(settings)? {
                return Ok(Self::new(
                    store,
                    format!("{}/data/state", settings.connector),
                    log,
                    &settings.run_id,
                ));
            }
        }
        Ok(Self::new(
            BlobStore::local("."),
            format!(".state/{}", settings.environment),
            log,
            &settings.run_id,
        ))
    }

    pub fn key(&self, asset: &str) -> String {
        format!("{}/{asset}.json", self.prefix)
    }

    /// The stored document, or an empty object when none exists yet.
    pub fn load_state(&self, asset: &str) -> Result<Map<String, Value>, ConnectorError> {
        match self.store.get(&self.key(asset))? {
            Some(content) => match serde_json::from_slice(&content)? {
                Value::Object(map) => Ok(map),
                _ => Err(ConnectorError::Json(format!(
                    "state for {asset} is not a JSON object"
                ))),
            },
            None => Ok(Map::new()),
        }
    }

    pub fn save_state(
        &self,
        asset: &str,
        mut document: Map<String, Value>,
    ) -> Result<String, ConnectorError> {
        let old = self.load_state(asset)?;
        let mut metadata = Map::new();
        metadata.insert(
            "updated_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        metadata.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        document.insert("_metadata".to_string(), Value::Object(metadata));

        let content = serde_json::to_vec_pretty(&document)?;
        let uri = self.store.put(&self.key(asset), &content)?;
        self.log.log_state_change(asset, &old, &document);
        tracing::debug!(asset, uri = %uri, "saved state");
        Ok(uri)
    }
}
