use std::collections::HashMap;

use assert_matches::assert_matches;

use zillow_connector::config::{BackendKind, ConfigLoader, ExecutionMode};
use zillow_connector::error::ConnectorError;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn cloud_mode_lists_every_missing_variable() {
    let err = ConfigLoader::from_map(&vars(&[("CI", "true"), ("R2_BUCKET_NAME", "b")])).unwrap_err();
    assert_matches!(
        err,
        ConnectorError::MissingEnv { ref mode, ref missing }
            if mode == "cloud"
                && missing == &["R2_ACCOUNT_ID", "R2_ACCESS_KEY_ID", "R2_SECRET_ACCESS_KEY"]
    );
}

#[test]
fn cloud_defaults_to_remote_backend() {
    let settings = ConfigLoader::from_map(&vars(&[
        ("CI", "true"),
        ("R2_ACCOUNT_ID", "acct"),
        ("R2_ACCESS_KEY_ID", "key"),
        ("R2_SECRET_ACCESS_KEY", "secret"),
        ("R2_BUCKET_NAME", "bucket"),
        ("RUN_ID", "r7"),
    ]))
    .unwrap();
    assert_eq!(settings.mode, ExecutionMode::Cloud);
    assert_eq!(settings.backend, BackendKind::Remote);
    assert_eq!(settings.log_dir.as_str(), "/tmp/logs/r7");
    assert_eq!(settings.r2.unwrap().endpoint(), "https://acct.r2.cloudflarestorage.com");
}

#[test]
fn catalog_backend_requires_platform_credentials() {
    let err = ConfigLoader::from_map(&vars(&[("DATA_DIR", "d"), ("STORAGE_BACKEND", "catalog")]))
        .unwrap_err();
    assert_matches!(
        err,
        ConnectorError::MissingEnv { ref missing, .. }
            if missing == &["SUBSETS_API_KEY", "SUBSETS_WAREHOUSE"]
    );

    let settings = ConfigLoader::from_map(&vars(&[
        ("DATA_DIR", "d"),
        ("STORAGE_BACKEND", "catalog"),
        ("SUBSETS_API_KEY", "k"),
        ("SUBSETS_WAREHOUSE", "w"),
        ("SUBSETS_CATALOG_URL", "sqlite:///var/catalog.db"),
    ]))
    .unwrap();
    let catalog = settings.catalog.unwrap();
    assert_eq!(catalog.database.as_str(), "/var/catalog.db");
    assert_eq!(catalog.api_url, "https://api.subsets.com");
}

#[test]
fn unknown_backend_is_fatal() {
    assert_matches!(
        ConfigLoader::from_map(&vars(&[("DATA_DIR", "d"), ("STORAGE_BACKEND", "ftp")])),
        Err(ConnectorError::UnknownBackend(ref value)) if value == "ftp"
    );
}
