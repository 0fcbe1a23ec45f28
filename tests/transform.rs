mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use common::{METRO_CSV, RecordingSink, local_settings};
use zillow_connector::app::{Phases, Pipeline};
use zillow_connector::blob::BlobStore;
use zillow_connector::domain::RegionType;
use zillow_connector::error::ConnectorError;
use zillow_connector::store::RawStore;
use zillow_connector::table::{DataType, Value};
use zillow_connector::transform::{MERGE_KEY, build_slice, find_family};
use zillow_connector::warehouse::TableStore;

fn raw_store(temp: &tempfile::TempDir) -> RawStore {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    RawStore::new(BlobStore::local(root), "raw")
}

#[test]
fn metro_csv_becomes_four_long_rows() {
    let temp = tempfile::tempdir().unwrap();
    let raw = raw_store(&temp);
    raw.save_raw_file(METRO_CSV.as_bytes(), "zhvi_all_homes_metro", "csv").unwrap();

    let family = find_family("home_value").unwrap();
    let table = build_slice(&raw, family, RegionType::Metro).unwrap().unwrap();

    assert_eq!(table.num_rows(), 4);
    assert_eq!(
        table.column_names(),
        vec!["region_id", "region_name", "state_code", "date", "all_homes"]
    );
    assert_eq!(table.column("region_id").unwrap().data.data_type(), DataType::Int64);
    let dates = table.column("date").unwrap();
    assert_eq!(dates.data.value(0), Value::Str("2020-01-31"));
    assert_eq!(dates.data.value(3), Value::Str("2020-02-29"));
    assert_eq!(table.column("region_name").unwrap().data.value(0), Value::Str("Los Angeles, CA"));
}

#[test]
fn non_numeric_values_are_dropped() {
    let temp = tempfile::tempdir().unwrap();
    let raw = raw_store(&temp);
    let csv = "RegionID,RegionName,RegionType,StateName,2020-01-31,2020-02-29\n\
               1,Alpha,msa,TX,abc,200\n\
               2,Beta,msa,TX,300,n/a\n";
    raw.save_raw_file(csv.as_bytes(), "zori_metro", "csv").unwrap();

    let family = find_family("rent").unwrap();
    let table = build_slice(&raw, family, RegionType::Metro).unwrap().unwrap();
    assert_eq!(table.num_rows(), 2);
    assert_eq!(table.column("rent").unwrap().data.null_count(), 0);
}

#[test]
fn missing_variants_and_other_granularities_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let raw = raw_store(&temp);
    raw.save_raw_file(METRO_CSV.as_bytes(), "new_listings_metro", "csv").unwrap();

    let family = find_family("inventory").unwrap();
    let metro = build_slice(&raw, family, RegionType::Metro).unwrap().unwrap();
    assert!(metro.has_column("new_listings"));
    assert!(!metro.has_column("for_sale_inventory"));
    assert!(build_slice(&raw, family, RegionType::Zip).unwrap().is_none());
}

#[test]
fn state_rows_lose_state_code() {
    let temp = tempfile::tempdir().unwrap();
    let raw = raw_store(&temp);
    let csv = "RegionID,SizeRank,RegionName,RegionType,StateName,2021-01-31\n\
               9,0,California,state,,450000\n\
               394913,1,\"New York, NY\",msa,NY,500000\n";
    raw.save_raw_file(csv.as_bytes(), "zhvi_all_homes_state", "csv").unwrap();

    let family = find_family("home_value").unwrap();
    let table = build_slice(&raw, family, RegionType::State).unwrap().unwrap();
    assert_eq!(table.num_rows(), 1);
    assert!(!table.has_column("state_code"));
}

#[test]
fn failing_slice_does_not_stop_the_phase() {
    let temp = tempfile::tempdir().unwrap();
    let settings = local_settings(&temp);
    let pipeline = Pipeline::from_settings(settings).unwrap();
    pipeline
        .raw()
        .save_raw_file(METRO_CSV.as_bytes(), "zori_metro", "csv")
        .unwrap();

    let sink = RecordingSink::default();
    let summary = pipeline.run(Phases::from_flags(false, true), &sink).unwrap();

    let report = summary.transform.as_ref().unwrap();
    assert_eq!(report.slices.len(), 20);
    assert_eq!(report.failed(), 1);
    assert_matches!(summary.check(), Err(ConnectorError::SlicesFailed { failed: 1, total: 20 }));
    let lines = sink.lines.lock().unwrap();
    assert!(lines.iter().any(|line| line == "=== Phase 2: Transform ==="));
    assert!(lines.iter().any(|line| line.contains("FAILED")));
    assert!(lines.iter().any(|line| line == "--- Sales ---"));
    assert!(pipeline.sink().warehouse().load("zillow_rent_metro").unwrap().is_none());
}

#[test]
fn merge_upload_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let settings = local_settings(&temp);
    let pipeline = Pipeline::from_settings(settings).unwrap();
    pipeline
        .raw()
        .save_raw_file(METRO_CSV.as_bytes(), "zhvi_all_homes_metro", "csv")
        .unwrap();
    let family = find_family("home_value").unwrap();
    let table = build_slice(pipeline.raw(), family, RegionType::Metro).unwrap().unwrap();

    let sink = pipeline.sink();
    sink.upload(&table, "zillow_home_value_metro", "merge", Some(MERGE_KEY)).unwrap();
    assert!(!sink.has_changed(&table, "zillow_home_value_metro"));
    sink.upload(&table, "zillow_home_value_metro", "merge", Some(MERGE_KEY)).unwrap();

    let stored = sink.load_asset("zillow_home_value_metro").unwrap();
    assert_eq!(stored.num_rows(), 4);
}
