use assert_matches::assert_matches;

use regex::Regex;

use zillow_connector::table::{Column, Table};
use zillow_connector::validate::{
    Schema, ValidationError, assert_in_set, assert_matches_pattern, validate,
};

fn rows(count: usize) -> Table {
    Table::new(vec![
        Column::strings("date", (0..count).map(|_| Some("2020-01-31")).collect()),
        Column::int64("region_id", (0..count as i64).map(Some).collect()),
    ])
    .unwrap()
}

#[test]
fn min_rows_boundary() {
    let schema = Schema::new().min_rows(100);
    assert_matches!(
        validate(&rows(99), &schema),
        Err(ValidationError::TooFewRows { expected: 100, actual: 99 })
    );
    validate(&rows(100), &schema).unwrap();
}

#[test]
fn composite_unique_counts_duplicates() {
    let schema = Schema::new().unique(&["date", "region_id"]);
    validate(&rows(3), &schema).unwrap();

    let duplicated = Table::new(vec![
        Column::strings("date", vec![Some("2020-01-31"), Some("2020-01-31"), Some("2020-02-29")]),
        Column::int64("region_id", vec![Some(7), Some(7), Some(7)]),
    ])
    .unwrap();
    let err = validate(&duplicated, &schema).unwrap_err();
    assert_matches!(err, ValidationError::Duplicates { count, .. } if count > 0);
}

#[test]
fn schema_from_json_checks_types_and_nulls() {
    let schema: Schema = serde_json::from_value(serde_json::json!({
        "columns": { "date": "string", "region_id": "int" },
        "not_null": ["region_id"],
    }))
    .unwrap();
    validate(&rows(2), &schema).unwrap();

    let wrong: Schema = serde_json::from_value(serde_json::json!({
        "columns": { "region_id": "double" },
    }))
    .unwrap();
    assert_matches!(
        validate(&rows(2), &wrong),
        Err(ValidationError::ColumnType { ref column, .. }) if column == "region_id"
    );

    let with_nulls = Table::new(vec![Column::int64("region_id", vec![Some(1), None])]).unwrap();
    assert_matches!(
        validate(&with_nulls, &schema),
        Err(ValidationError::MissingColumn(ref column)) if column == "date"
    );
    let not_null = Schema::new().not_null(&["region_id"]);
    assert_matches!(
        validate(&with_nulls, &not_null),
        Err(ValidationError::NullValues { count: 1, .. })
    );
}

#[test]
fn set_membership_reports_offenders() {
    let table = Table::new(vec![Column::strings(
        "region_type",
        vec![Some("msa"), Some("zip"), Some("planet")],
    )])
    .unwrap();
    let err = assert_in_set(&table, "region_type", &["msa", "zip"]).unwrap_err();
    assert_matches!(err, ValidationError::InvalidValues { ref sample, .. } if sample == &["planet"]);
}

#[test]
fn pattern_is_anchored_at_the_start() {
    let table = Table::new(vec![Column::strings(
        "code",
        vec![Some("abc"), Some("abc-1"), None],
    )])
    .unwrap();
    let pattern = Regex::new("abc").unwrap();
    assert_matches_pattern(&table, "code", &pattern, None).unwrap();

    let shifted = Table::new(vec![Column::strings("code", vec![Some("xabc")])]).unwrap();
    assert_matches!(
        assert_matches_pattern(&shifted, "code", &pattern, Some("codes")),
        Err(ValidationError::InvalidValues { rule, sample, .. })
            if rule == "values not matching codes" && sample == ["xabc"]
    );
}
