//! Declarative table checks plus standalone column assertions.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::table::{Table, Value};

const SAMPLE_SIZE: usize = 5;

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());
static QUARTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-Q[1-4]$").unwrap());
static MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").unwrap());
static WEEK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-W(0[1-9]|[1-4]\d|5[0-3])$").unwrap());
static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$").unwrap());

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("expected >= {expected} rows, got {actual}")]
    TooFewRows { expected: usize, actual: usize },
    #[error("expected <= {expected} rows, got {actual}")]
    TooManyRows { expected: usize, actual: usize },
    #[error("missing column: {0}")]
    MissingColumn(String),
    #[error("column '{column}': expected type containing '{expected}', got '{actual}'")]
    ColumnType {
        column: String,
        expected: String,
        actual: String,
    },
    #[error("column '{column}' has {count} null values")]
    NullValues { column: String, count: usize },
    #[error("columns {columns:?} have {count} duplicate combinations")]
    Duplicates { columns: Vec<String>, count: usize },
    #[error("column '{column}' has {rule}: {sample:?}...")]
    InvalidValues {
        column: String,
        rule: String,
        sample: Vec<String>,
    },
    #[error("column '{column}' spans years {first}..={last}, allowed {min}..={max}")]
    YearRange {
        column: String,
        first: i32,
        last: i32,
        min: i32,
        max: i32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub min_rows: Option<usize>,
    #[serde(default)]
    pub max_rows: Option<usize>,
    /// Column name to a substring of its expected type name.
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub not_null: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub unique: Vec<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_rows(mut self, rows: usize) -> Self {
        self.min_rows = Some(rows);
        self
    }

    pub fn max_rows(mut self, rows: usize) -> Self {
        self.max_rows = Some(rows);
        self
    }

    pub fn column(mut self, name: &str, type_name: &str) -> Self {
        self.columns.insert(name.to_string(), type_name.to_string());
        self
    }

    pub fn not_null(mut self, columns: &[&str]) -> Self {
        self.not_null = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(column) => vec![column],
        OneOrMany::Many(columns) => columns,
    })
}

/// Checks row bounds, column types, nulls and uniqueness, stopping at the first failure.
pub fn validate(table: &Table, schema: &Schema) -> Result<(), ValidationError> {
    let rows = table.num_rows();
    if let Some(min_rows) = schema.min_rows {
        if rows < min_rows {
            return Err(ValidationError::TooFewRows {
                expected: min_rows,
                actual: rows,
            });
        }
    }
    if let Some(max_rows) = schema.max_rows {
        if rows > max_rows {
            return Err(ValidationError::TooManyRows {
                expected: max_rows,
                actual: rows,
            });
        }
    }

    for (name, expected) in &schema.columns {
        let column = table
            .column(name)
            .ok_or_else(|| ValidationError::MissingColumn(name.clone()))?;
        let actual = column.data.data_type().to_string();
        if !actual.contains(expected.as_str()) {
            return Err(ValidationError::ColumnType {
                column: name.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    for name in &schema.not_null {
        let column = table
            .column(name)
            .ok_or_else(|| ValidationError::MissingColumn(name.clone()))?;
        let count = column.data.null_count();
        if count > 0 {
            return Err(ValidationError::NullValues {
                column: name.clone(),
                count,
            });
        }
    }

    if !schema.unique.is_empty() {
        let indices = schema
            .unique
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| ValidationError::MissingColumn(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let distinct = (0..rows)
            .map(|row| table.row_key(row, &indices))
            .collect::<HashSet<_>>()
            .len();
        if distinct < rows {
            return Err(ValidationError::Duplicates {
                columns: schema.unique.clone(),
                count: rows - distinct,
            });
        }
    }
    Ok(())
}

fn non_null<'a>(
    table: &'a Table,
    column: &str,
) -> Result<impl Iterator<Item = Value<'a>> + 'a, ValidationError> {
    let column = table
        .column(column)
        .ok_or_else(|| ValidationError::MissingColumn(column.to_string()))?;
    Ok(column.data.values().filter(|value| !value.is_null()))
}

fn check_each<F>(table: &Table, column: &str, rule: &str, is_valid: F) -> Result<(), ValidationError>
where
    F: Fn(&Value<'_>) -> bool,
{
    let invalid = non_null(table, column)?
        .filter(|value| !is_valid(value))
        .map(|value| value.to_string())
        .collect::<Vec<_>>();
    if invalid.is_empty() {
        return Ok(());
    }
    Err(ValidationError::InvalidValues {
        column: column.to_string(),
        rule: rule.to_string(),
        sample: invalid.into_iter().take(SAMPLE_SIZE).collect(),
    })
}

fn matches(regex: &Regex) -> impl Fn(&Value<'_>) -> bool + '_ {
    move |value| regex.is_match(&value.to_string())
}

pub fn assert_valid_year(table: &Table, column: &str) -> Result<(), ValidationError> {
    check_each(table, column, "invalid year values", matches(&YEAR))
}

pub fn assert_valid_quarter(table: &Table, column: &str) -> Result<(), ValidationError> {
    check_each(table, column, "invalid quarter values", matches(&QUARTER))
}

pub fn assert_valid_month(table: &Table, column: &str) -> Result<(), ValidationError> {
    check_each(table, column, "invalid month values", matches(&MONTH))
}

pub fn assert_valid_week(table: &Table, column: &str) -> Result<(), ValidationError> {
    check_each(table, column, "invalid week values", matches(&WEEK))
}

pub fn assert_valid_date(table: &Table, column: &str) -> Result<(), ValidationError> {
    check_each(table, column, "invalid date values", matches(&DATE))
}

/// Accepts any of the year, quarter, month, week or full-date shapes.
pub fn assert_valid_date_any(table: &Table, column: &str) -> Result<(), ValidationError> {
    check_each(table, column, "invalid date values", |value| {
        let text = value.to_string();
        [&*YEAR, &*QUARTER, &*MONTH, &*WEEK, &*DATE]
            .iter()
            .any(|regex| regex.is_match(&text))
    })
}

pub fn assert_max_length(table: &Table, column: &str, max_len: usize) -> Result<(), ValidationError> {
    check_each(
        table,
        column,
        &format!("values exceeding {max_len} chars"),
        |value| value.to_string().chars().count() <= max_len,
    )
}

pub fn assert_min_length(table: &Table, column: &str, min_len: usize) -> Result<(), ValidationError> {
    check_each(
        table,
        column,
        &format!("values shorter than {min_len} chars"),
        |value| value.to_string().chars().count() >= min_len,
    )
}

pub fn assert_length(table: &Table, column: &str, exact_len: usize) -> Result<(), ValidationError> {
    check_each(
        table,
        column,
        &format!("values not exactly {exact_len} chars"),
        |value| value.to_string().chars().count() == exact_len,
    )
}

/// The pattern must match from the first character; a trailing remainder is allowed.
pub fn assert_matches_pattern(
    table: &Table,
    column: &str,
    pattern: &Regex,
    description: Option<&str>,
) -> Result<(), ValidationError> {
    let rule = match description {
        Some(description) => format!("values not matching {description}"),
        None => format!("values not matching pattern '{}'", pattern.as_str()),
    };
    check_each(table, column, &rule, |value| {
        pattern
            .find(&value.to_string())
            .is_some_and(|found| found.start() == 0)
    })
}

pub fn assert_in_set(table: &Table, column: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    check_each(table, column, "unexpected values", |value| {
        allowed.contains(&value.to_string().as_str())
    })
}

/// Non-numeric values fail every numeric assertion.
pub fn assert_positive(table: &Table, column: &str, allow_zero: bool) -> Result<(), ValidationError> {
    if allow_zero {
        check_each(table, column, "negative values", |value| {
            value.as_f64().is_some_and(|v| v >= 0.0)
        })
    } else {
        check_each(table, column, "non-positive values", |value| {
            value.as_f64().is_some_and(|v| v > 0.0)
        })
    }
}

pub fn assert_in_range(
    table: &Table,
    column: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), ValidationError> {
    let describe = |bound: Option<f64>| bound.map(|b| b.to_string()).unwrap_or("-".to_string());
    let rule = format!("values outside range [{}, {}]", describe(min), describe(max));
    check_each(table, column, &rule, |value| {
        value.as_f64().is_some_and(|v| {
            min.is_none_or(|min| v >= min) && max.is_none_or(|max| v <= max)
        })
    })
}

pub fn assert_percentage(table: &Table, column: &str) -> Result<(), ValidationError> {
    assert_in_range(table, column, Some(0.0), Some(100.0))
}

/// Checks the leading four digits of the earliest and latest values in a date column.
pub fn assert_year_range(
    table: &Table,
    column: &str,
    min: i32,
    max: i32,
) -> Result<(), ValidationError> {
    let years = non_null(table, column)?
        .filter_map(|value| value.to_string().get(..4).and_then(|y| y.parse::<i32>().ok()))
        .collect::<Vec<_>>();
    let (Some(&first), Some(&last)) = (years.iter().min(), years.iter().max()) else {
        return Ok(());
    };
    if first < min || last > max {
        return Err(ValidationError::YearRange {
            column: column.to_string(),
            first,
            last,
            min,
            max,
        });
    }
    Ok(())
}
