//! Transform phase: raw CSVs to validated, published long-format tables.
//!
//! Work is split into slices, one per (family, granularity). A slice that fails
//! validation or storage is recorded in the report and the next slice runs.

mod home_value;
mod inventory;
mod rent;
mod sales;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::RegionType;
use crate::error::ConnectorError;
use crate::reshape::{LongFrame, WideFrame, merge_variants, standardize_columns};
use crate::store::RawStore;
use crate::table::Table;
use crate::validate::{self, Schema, ValidationError};
use crate::warehouse::{DatasetMetadata, TableSink};

pub const MERGE_KEY: &str = "date,region_id";
pub const MAX_YEAR: i32 = 2030;

/// A metric family: which raw variants feed it and how its output is checked and described.
#[derive(Debug, Clone, Copy)]
pub struct Family {
    pub name: &'static str,
    pub title: &'static str,
    /// Raw dataset id to output value column.
    pub variants: &'static [(&'static str, &'static str)],
    pub check: fn(&Table, RegionType) -> Result<(), ValidationError>,
    pub metadata: fn(RegionType, &[String]) -> DatasetMetadata,
}

impl Family {
    pub fn dataset_id(&self, region: RegionType) -> String {
        format!("zillow_{}_{}", self.name, region.as_str())
    }

    pub fn value_columns(&self) -> Vec<&'static str> {
        self.variants.iter().map(|(_, column)| *column).collect()
    }
}

pub static FAMILIES: [Family; 4] = [
    home_value::FAMILY,
    rent::FAMILY,
    inventory::FAMILY,
    sales::FAMILY,
];

pub fn find_family(name: &str) -> Option<&'static Family> {
    FAMILIES.iter().find(|family| family.name == name)
}

/// Loads one raw CSV and melts it; a missing raw asset yields `None`.
pub fn load_and_melt(
    raw: &RawStore,
    asset_id: &str,
    value_column: &str,
) -> Result<Option<LongFrame>, ConnectorError> {
    let text = match raw.load_raw_text(asset_id, "csv") {
        Ok(text) => text,
        Err(ConnectorError::RawNotFound(_)) => {
            tracing::debug!(asset = asset_id, "raw variant not found, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    let frame = WideFrame::parse(&text)?;
    Ok(Some(frame.melt(value_column)))
}

/// Builds the standardized table for one slice, or `None` when there is nothing to write.
pub fn build_slice(
    raw: &RawStore,
    family: &Family,
    region: RegionType,
) -> Result<Option<Table>, ConnectorError> {
    let mut frames = Vec::new();
    for (raw_id, column) in family.variants {
        if let Some(frame) = load_and_melt(raw, &format!("{raw_id}_{}", region.as_str()), column)? {
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
    }
    if frames.is_empty() {
        return Ok(None);
    }
    let merged = merge_variants(frames);
    let table = standardize_columns(&merged, region)?;
    Ok((!table.is_empty()).then_some(table))
}

/// Checks every family output shares: column types, key columns, date shape and years.
pub(crate) fn check_common(
    table: &Table,
    value_columns: &[&str],
    not_null: &[&str],
    min_rows: usize,
    min_year: i32,
) -> Result<(), ValidationError> {
    let mut schema = Schema::new()
        .min_rows(min_rows)
        .column("date", "string")
        .column("region_id", "int")
        .column("region_name", "string")
        .not_null(not_null)
        .unique(&["date", "region_id"]);
    if table
        .column("state_code")
        .is_some_and(|column| column.data.data_type() != crate::table::DataType::Null)
    {
        schema = schema.column("state_code", "string");
    }
    for column in value_columns {
        if table.has_column(column) {
            schema = schema.column(column, "double");
        }
    }
    validate::validate(table, &schema)?;
    validate::assert_valid_date(table, "date")?;
    validate::assert_year_range(table, "date", min_year, MAX_YEAR)
}

pub(crate) fn check_range(
    table: &Table,
    columns: &[&str],
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), ValidationError> {
    for column in columns {
        if table.has_column(column) {
            validate::assert_in_range(table, column, min, max)?;
        }
    }
    Ok(())
}

/// Column descriptions shared by every family.
pub(crate) fn base_descriptions(region: RegionType) -> BTreeMap<String, String> {
    let mut descriptions = BTreeMap::from([
        ("date".to_string(), "End of month date (YYYY-MM-DD)".to_string()),
        ("region_id".to_string(), "Zillow region identifier".to_string()),
        ("region_name".to_string(), format!("{} name", region.label())),
    ]);
    if region.has_parent_state() {
        descriptions.insert("state_code".to_string(), "Two-letter US state code".to_string());
    }
    descriptions
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SliceOutcome {
    Written { rows: usize, location: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceResult {
    pub dataset: String,
    #[serde(flatten)]
    pub outcome: SliceOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformReport {
    pub slices: Vec<SliceResult>,
}

impl TransformReport {
    pub fn failed(&self) -> usize {
        self.slices
            .iter()
            .filter(|slice| matches!(slice.outcome, SliceOutcome::Failed { .. }))
            .count()
    }

    pub fn written(&self) -> usize {
        self.slices
            .iter()
            .filter(|slice| matches!(slice.outcome, SliceOutcome::Written { .. }))
            .count()
    }

    pub fn check(&self) -> Result<(), ConnectorError> {
        match self.failed() {
            0 => Ok(()),
            failed => Err(ConnectorError::SlicesFailed {
                failed,
                total: self.slices.len(),
            }),
        }
    }
}

pub struct Transform<'a> {
    pub raw: &'a RawStore,
    pub sink: &'a TableSink,
}

impl Transform<'_> {
    pub fn run(
        &self,
        families: &[Family],
        regions: &[RegionType],
        progress: &dyn ProgressSink,
    ) -> TransformReport {
        let mut report = TransformReport::default();
        for family in families {
            progress.event(ProgressEvent::message(format!("--- {} ---", family.title)));
            for region in regions {
                let dataset = family.dataset_id(*region);
                progress.event(ProgressEvent::message(format!(
                    "Processing {} {region}...",
                    family.name
                )));
                let outcome = match self.run_slice(family, *region, &dataset, progress) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::error!(dataset = %dataset, error = %err, "slice failed");
                        progress.event(ProgressEvent::message(format!("  -> FAILED: {err}")));
                        SliceOutcome::Failed {
                            error: err.to_string(),
                        }
                    }
                };
                report.slices.push(SliceResult { dataset, outcome });
            }
        }
        report
    }

    fn run_slice(
        &self,
        family: &Family,
        region: RegionType,
        dataset: &str,
        progress: &dyn ProgressSink,
    ) -> Result<SliceOutcome, ConnectorError> {
        let Some(table) = build_slice(self.raw, family, region)? else {
            progress.event(ProgressEvent::message(format!(
                "  No data for {region}, skipping"
            )));
            return Ok(SliceOutcome::Skipped {
                reason: "no data".to_string(),
            });
        };
        progress.event(ProgressEvent::message(format!(
            "  {region}: {} rows",
            table.num_rows()
        )));

        (family.check)(&table, region)?;
        let location = self.sink.upload(&table, dataset, "merge", Some(MERGE_KEY))?;
        let metadata = (family.metadata)(region, &table.column_names());
        self.sink.publish(dataset, &metadata)?;
        Ok(SliceOutcome::Written {
            rows: table.num_rows(),
            location,
        })
    }
}
