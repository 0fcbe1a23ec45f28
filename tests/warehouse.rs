mod common;

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use common::TestServer;
use zillow_connector::blob::BlobStore;
use zillow_connector::error::ConnectorError;
use zillow_connector::observe::{DATA_OUTPUTS, RunLog};
use zillow_connector::table::{Column, Table};
use zillow_connector::warehouse::{
    CatalogTables, DatasetMetadata, FileTables, PlatformClient, PublishOutcome, TableSink,
    TableStore, Warehouse,
};

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn local_sink(temp: &tempfile::TempDir, log: RunLog) -> TableSink {
    let warehouse = Warehouse::Local(FileTables::new(BlobStore::local(root(temp)), "subsets"));
    TableSink::new(warehouse, log)
}

fn table(ids: &[i64], values: &[f64]) -> Table {
    Table::new(vec![
        Column::strings("date", ids.iter().map(|_| Some("2020-01-31")).collect()),
        Column::int64("region_id", ids.iter().map(|id| Some(*id)).collect()),
        Column::double("value", values.iter().map(|v| Some(*v)).collect()),
    ])
    .unwrap()
}

fn metadata(columns: &[(&str, &str)]) -> DatasetMetadata {
    DatasetMetadata {
        id: "x".to_string(),
        title: "X".to_string(),
        description: "test table".to_string(),
        column_descriptions: columns
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[test]
fn merge_without_key_fails_before_io() {
    let temp = tempfile::tempdir().unwrap();
    let sink = local_sink(&temp, RunLog::disabled());

    assert_matches!(
        sink.upload(&table(&[1], &[1.0]), "x", "merge", None),
        Err(ConnectorError::MissingMergeKey)
    );
    assert_matches!(
        sink.upload(&table(&[1], &[1.0]), "x", "upsert", None),
        Err(ConnectorError::InvalidMode(_))
    );
    assert!(!temp.path().join("subsets").exists());
}

#[test]
fn overwrite_replaces_all_rows() {
    let temp = tempfile::tempdir().unwrap();
    let sink = local_sink(&temp, RunLog::disabled());
    sink.upload(&table(&[1, 2, 3], &[1.0, 2.0, 3.0]), "x", "append", None).unwrap();
    sink.upload(&table(&[9], &[9.0]), "x", "overwrite", None).unwrap();

    let stored = sink.load_asset("x").unwrap();
    assert_eq!(stored.num_rows(), 1);
}

#[test]
fn merge_updates_and_inserts() {
    let temp = tempfile::tempdir().unwrap();
    let sink = local_sink(&temp, RunLog::disabled());
    sink.upload(&table(&[1, 2], &[1.0, 2.0]), "x", "merge", Some("date,region_id")).unwrap();
    sink.upload(&table(&[2, 3], &[20.0, 30.0]), "x", "merge", Some("date, region_id")).unwrap();

    let stored = sink.load_asset("x").unwrap();
    assert_eq!(stored.num_rows(), 3);
    let values = stored.column("value").unwrap().data.values().filter_map(|v| v.as_f64()).collect::<Vec<_>>();
    assert_eq!(values, vec![1.0, 20.0, 30.0]);
}

#[test]
fn uploads_are_profiled_to_run_log() {
    let temp = tempfile::tempdir().unwrap();
    let log_dir = root(&temp).join("logs");
    let sink = local_sink(&temp, RunLog::disabled().with_dir(log_dir.clone(), true));
    assert_eq!(sink.upload(&Table::default(), "x", "append", None).unwrap(), "");
    sink.upload(&table(&[1], &[1.0]), "x", "append", None).unwrap();

    let content = std::fs::read_to_string(log_dir.join(DATA_OUTPUTS).as_std_path()).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("date,region_id,value"));
}

#[test]
fn publish_rejects_unknown_columns() {
    let temp = tempfile::tempdir().unwrap();
    let sink = local_sink(&temp, RunLog::disabled());
    sink.upload(&table(&[1], &[1.0]), "x", "append", None).unwrap();

    let err = sink
        .publish("x", &metadata(&[("value", "v"), ("bogus", "b"), ("other", "o")]))
        .unwrap_err();
    assert_matches!(err, ConnectorError::InvalidDescriptionColumns(ref columns) if columns == &["bogus", "other"]);

    sink.publish("x", &metadata(&[("value", "v")])).unwrap();
    let snapshot = sink.warehouse().snapshot("x").unwrap().unwrap();
    let stored: DatasetMetadata = serde_json::from_str(&snapshot.description.unwrap()).unwrap();
    assert_eq!(stored.title, "X");
}

#[test]
fn publish_requires_existing_table() {
    let temp = tempfile::tempdir().unwrap();
    let sink = local_sink(&temp, RunLog::disabled());
    assert_matches!(
        sink.publish("missing", &metadata(&[])),
        Err(ConnectorError::TableNotFound(_))
    );
    let mut untitled = metadata(&[]);
    untitled.title.clear();
    assert_matches!(
        sink.publish("missing", &untitled),
        Err(ConnectorError::MissingMetadataField(ref field)) if field == "title"
    );
}

#[test]
fn catalog_backend_publishes_to_platform() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::start(200, "{\"status\":\"published\"}");
    let database = root(&temp).join("catalog/catalog.db");
    let catalog = CatalogTables::open(&database, "wh", "zillow", false).unwrap();
    let platform = PlatformClient::new(&server.url, "secret", "zillow", RunLog::disabled()).unwrap();
    let sink = TableSink::new(Warehouse::Catalog(catalog), RunLog::disabled()).with_platform(platform);

    let location = sink.upload(&table(&[1, 2], &[1.0, 2.0]), "rent_metro", "merge", Some("date,region_id")).unwrap();
    assert_eq!(location, "subsets.zillow_rent_metro");
    assert!(root(&temp).join("catalog/warehouse/subsets/zillow_rent_metro").exists());

    sink.publish("rent_metro", &metadata(&[("value", "v")])).unwrap();
    assert_eq!(server.hits(), 1);
    let body: serde_json::Value = serde_json::from_str(&server.bodies()[0]).unwrap();
    assert_eq!(body["id"], "subsets.zillow_rent_metro");
    assert_eq!(body["columns"]["value"], "v");
}

#[test]
fn platform_status_codes_map_to_outcomes() {
    for (status, expected) in [
        (409, PublishOutcome::AlreadyPublished),
        (404, PublishOutcome::NotFound),
        (500, PublishOutcome::Failed(500)),
    ] {
        let server = TestServer::start(status, "nope");
        let client = PlatformClient::new(&server.url, "secret", "zillow", RunLog::disabled()).unwrap();
        assert_eq!(client.publish("x", &metadata(&[])).unwrap(), expected);
    }
}
