use std::fs;
use std::sync::{Mutex, MutexGuard};

use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};

use super::{DataFile, SnapshotInfo, TableStore, WriteMode, now, part_name, plan_write, warehouse_dir};
use crate::blob::{FsStore, ObjectStore};
use crate::columnar::{self, FileMetadata};
use crate::error::ConnectorError;
use crate::table::{Field, Table};

const NAMESPACE: &str = "subsets";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS tables (
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    warehouse TEXT NOT NULL,
    schema_json TEXT NOT NULL,
    description TEXT,
    properties TEXT NOT NULL DEFAULT '{}',
    current_snapshot_id INTEGER,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, name)
);
CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    parent_id INTEGER,
    operation TEXT NOT NULL,
    files_json TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    committed_at TEXT NOT NULL
);
";

#[derive(Debug, Clone)]
struct TableEntry {
    schema: Vec<Field>,
    description: Option<String>,
    snapshot_id: Option<i64>,
    files: Vec<DataFile>,
    updated_at: String,
}

/// SQLite-registered tables with optimistic snapshot commits.
#[derive(Debug)]
pub struct CatalogTables {
    conn: Mutex<Connection>,
    data: FsStore,
    warehouse: String,
    connector: String,
    continue_on_snapshot_error: bool,
}

impl CatalogTables {
    pub fn open(
        database: &Utf8Path,
        warehouse: &str,
        connector: &str,
        continue_on_snapshot_error: bool,
    ) -> Result<Self, ConnectorError> {
        if let Some(parent) = database.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(database.as_std_path())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO namespaces (name) VALUES (?1)",
            params![NAMESPACE],
        )?;
        tracing::info!(database = %database, "catalog opened");
        Ok(Self {
            conn: Mutex::new(conn),
            data: FsStore::new(warehouse_dir(database)),
            warehouse: warehouse.to_string(),
            connector: connector.to_string(),
            continue_on_snapshot_error,
        })
    }

    pub fn table_name(&self, dataset: &str) -> String {
        format!("{}_{dataset}", self.connector)
    }

    pub fn identifier(&self, dataset: &str) -> String {
        format!("{NAMESPACE}.{}", self.table_name(dataset))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ConnectorError> {
        self.conn
            .lock()
            .map_err(|err| ConnectorError::Catalog(format!("lock poisoned: {err}")))
    }

    fn part_key(&self, name: &str, file: &str) -> String {
        format!("{NAMESPACE}/{name}/{file}")
    }

    fn entry(&self, name: &str) -> Result<Option<TableEntry>, ConnectorError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT schema_json, description, current_snapshot_id, updated_at
                 FROM tables WHERE namespace = ?1 AND name = ?2",
                params![NAMESPACE, name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((schema_json, description, snapshot_id, updated_at)) = row else {
            return Ok(None);
        };
        let files = match snapshot_id {
            Some(id) => {
                let files_json: String = conn.query_row(
                    "SELECT files_json FROM snapshots WHERE snapshot_id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                serde_json::from_str(&files_json)?
            }
            None => Vec::new(),
        };
        Ok(Some(TableEntry {
            schema: serde_json::from_str(&schema_json)?,
            description,
            snapshot_id,
            files,
            updated_at,
        }))
    }

    fn read(&self, name: &str, entry: &TableEntry) -> Result<Table, ConnectorError> {
        let mut table = Table::empty(&entry.schema);
        for file in &entry.files {
            let content = self
                .data
                .get(&self.part_key(name, &file.path))?
                .ok_or_else(|| ConnectorError::TableNotFound(format!("{name} (missing part {})", file.path)))?;
            let (part, _) = columnar::decode(content)?;
            table = table.concat(&part.conform(&entry.schema)?)?;
        }
        Ok(table)
    }

    /// Writes against an explicit parent snapshot; a stale parent is a conflict.
    pub fn write_at(
        &self,
        dataset: &str,
        table: &Table,
        mode: WriteMode,
        merge_key: &[String],
        expected_parent: Option<i64>,
    ) -> Result<String, ConnectorError> {
        let name = self.table_name(dataset);
        let current = self.entry(&name)?;
        let plan = plan_write(
            current.as_ref().map(|entry| entry.schema.as_slice()),
            || match &current {
                Some(entry) => self.read(&name, entry),
                None => Ok(Table::default()),
            },
            table,
            mode,
            merge_key,
        )?;

        let path = part_name(current.as_ref().and_then(|e| e.snapshot_id).unwrap_or(0) + 1);
        let content = columnar::encode(&plan.part, &FileMetadata::new())?;
        self.data.put(&self.part_key(&name, &path), &content)?;

        let mut files = match (&current, plan.keep_existing_files) {
            (Some(entry), true) => entry.files.clone(),
            _ => Vec::new(),
        };
        files.push(DataFile {
            path: path.clone(),
            rows: plan.part.num_rows(),
            size_bytes: content.len(),
        });

        match self.commit(&name, expected_parent, &plan.schema, &files, mode) {
            Ok(snapshot_id) => {
                tracing::info!(table = %self.identifier(dataset), snapshot_id, rows = table.num_rows(), "committed snapshot");
                Ok(self.identifier(dataset))
            }
            Err(ConnectorError::SnapshotConflict { .. }) if self.continue_on_snapshot_error => {
                tracing::debug!(table = %self.identifier(dataset), "snapshot mismatch, continuing");
                if let Err(err) = self.data.delete(&self.part_key(&name, &path)) {
                    tracing::warn!(error = %err, "failed to remove uncommitted part");
                }
                Ok(self.identifier(dataset))
            }
            Err(err) => {
                if let Err(cleanup) = self.data.delete(&self.part_key(&name, &path)) {
                    tracing::warn!(error = %cleanup, "failed to remove uncommitted part");
                }
                Err(err)
            }
        }
    }

    fn commit(
        &self,
        name: &str,
        expected_parent: Option<i64>,
        schema: &[Field],
        files: &[DataFile],
        mode: WriteMode,
    ) -> Result<i64, ConnectorError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let found: Option<Option<i64>> = tx
            .query_row(
                "SELECT current_snapshot_id FROM tables WHERE namespace = ?1 AND name = ?2",
                params![NAMESPACE, name],
                |row| row.get(0),
            )
            .optional()?;
        let found_parent = found.flatten();
        if found.is_some() && found_parent != expected_parent {
            return Err(ConnectorError::SnapshotConflict {
                table: name.to_string(),
                expected: expected_parent,
                found: found_parent,
            });
        }

        let rows = files.iter().map(|file| file.rows).sum::<usize>() as i64;
        tx.execute(
            "INSERT INTO snapshots (namespace, name, parent_id, operation, files_json, row_count, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                NAMESPACE,
                name,
                found_parent,
                mode.as_str(),
                serde_json::to_string(files)?,
                rows,
                now()
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        let properties = serde_json::json!({ "connector": self.connector }).to_string();
        tx.execute(
            "INSERT INTO tables (namespace, name, warehouse, schema_json, properties, current_snapshot_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (namespace, name) DO UPDATE SET
                schema_json = excluded.schema_json,
                current_snapshot_id = excluded.current_snapshot_id,
                updated_at = excluded.updated_at",
            params![
                NAMESPACE,
                name,
                self.warehouse,
                serde_json::to_string(schema)?,
                properties,
                snapshot_id,
                now()
            ],
        )?;
        tx.commit()?;
        Ok(snapshot_id)
    }
}

impl TableStore for CatalogTables {
    fn write(
        &self,
        dataset: &str,
        table: &Table,
        mode: WriteMode,
        merge_key: &[String],
    ) -> Result<String, ConnectorError> {
        let parent = self
            .entry(&self.table_name(dataset))?
            .and_then(|entry| entry.snapshot_id);
        self.write_at(dataset, table, mode, merge_key, parent)
    }

    fn load(&self, dataset: &str) -> Result<Option<Table>, ConnectorError> {
        let name = self.table_name(dataset);
        match self.entry(&name)? {
            Some(entry) => self.read(&name, &entry).map(Some),
            None => Ok(None),
        }
    }

    fn set_description(&self, dataset: &str, description: &str) -> Result<(), ConnectorError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE tables SET description = ?1, updated_at = ?2 WHERE namespace = ?3 AND name = ?4",
            params![description, now(), NAMESPACE, self.table_name(dataset)],
        )?;
        if updated == 0 {
            return Err(ConnectorError::TableNotFound(self.identifier(dataset)));
        }
        Ok(())
    }

    fn snapshot(&self, dataset: &str) -> Result<Option<SnapshotInfo>, ConnectorError> {
        Ok(self.entry(&self.table_name(dataset))?.map(|entry| SnapshotInfo {
            version: entry.snapshot_id.unwrap_or(0),
            rows: entry.files.iter().map(|file| file.rows).sum(),
            files: entry.files.len(),
            schema: entry.schema,
            description: entry.description,
            updated_at: entry.updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::table::Column;

    fn open(temp: &tempfile::TempDir, continue_on_conflict: bool) -> CatalogTables {
        let database = Utf8PathBuf::from_path_buf(temp.path().join("catalog/catalog.db")).unwrap();
        CatalogTables::open(&database, "test-warehouse", "zillow", continue_on_conflict).unwrap()
    }

    fn rows(ids: &[i64]) -> Table {
        Table::new(vec![Column::int64("id", ids.iter().map(|id| Some(*id)).collect())]).unwrap()
    }

    #[test]
    fn snapshots_chain_on_append() {
        let temp = tempfile::tempdir().unwrap();
        let catalog = open(&temp, false);
        let location = catalog.write("home_value_metro", &rows(&[1]), WriteMode::Append, &[]).unwrap();
        assert_eq!(location, "subsets.zillow_home_value_metro");
        catalog.write("home_value_metro", &rows(&[2, 3]), WriteMode::Append, &[]).unwrap();

        let snapshot = catalog.snapshot("home_value_metro").unwrap().unwrap();
        assert_eq!(snapshot.rows, 3);
        assert_eq!(snapshot.files, 2);
        assert_eq!(catalog.load("home_value_metro").unwrap().unwrap().num_rows(), 3);
    }

    #[test]
    fn stale_parent_conflicts_unless_tolerated() {
        let temp = tempfile::tempdir().unwrap();
        let strict = open(&temp, false);
        strict.write("t", &rows(&[1]), WriteMode::Append, &[]).unwrap();
        strict.write("t", &rows(&[2]), WriteMode::Append, &[]).unwrap();

        assert_matches!(
            strict.write_at("t", &rows(&[3]), WriteMode::Append, &[], Some(1)),
            Err(ConnectorError::SnapshotConflict { expected: Some(1), found: Some(2), .. })
        );
        drop(strict);

        let lenient = open(&temp, true);
        lenient
            .write_at("t", &rows(&[3]), WriteMode::Append, &[], Some(1))
            .unwrap();
        assert_eq!(lenient.snapshot("t").unwrap().unwrap().rows, 2);
    }

    #[test]
    fn description_requires_registered_table() {
        let temp = tempfile::tempdir().unwrap();
        let catalog = open(&temp, false);
        assert_matches!(
            catalog.set_description("missing", "{}"),
            Err(ConnectorError::TableNotFound(_))
        );
    }
}
