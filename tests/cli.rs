mod common;

use std::collections::HashMap;
use std::process::Command;

use common::METRO_CSV;
use zillow_connector::app::Pipeline;
use zillow_connector::config::ConfigLoader;

#[test]
fn json_summary_is_printed_when_a_slice_fails() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().join("data").to_str().unwrap().to_string();
    let vars = HashMap::from([("DATA_DIR".to_string(), data_dir.clone())]);
    let pipeline = Pipeline::from_settings(ConfigLoader::from_map(&vars).unwrap()).unwrap();
    pipeline
        .raw()
        .save_raw_file(METRO_CSV.as_bytes(), "zori_metro", "csv")
        .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_zillow-connector"))
        .args(["--transform-only", "--json"])
        .env_clear()
        .env("DATA_DIR", &data_dir)
        .env("RUST_LOG", "off")
        .current_dir(temp.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let slices = summary["transform"]["slices"].as_array().unwrap();
    assert_eq!(slices.len(), 20);
    let rent = slices
        .iter()
        .find(|slice| slice["dataset"] == "zillow_rent_metro")
        .unwrap();
    assert_eq!(rent["status"], "failed");
    assert!(rent["error"].as_str().unwrap().contains("rows"));
    assert_eq!(
        slices.iter().filter(|slice| slice["status"] == "skipped").count(),
        19
    );
}
