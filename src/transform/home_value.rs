use super::{Family, base_descriptions, check_common, check_range};
use crate::domain::RegionType;
use crate::table::Table;
use crate::validate::ValidationError;
use crate::warehouse::DatasetMetadata;

const VARIANTS: &[(&str, &str)] = &[
    ("zhvi_all_homes", "all_homes"),
    ("zhvi_sfr", "single_family"),
    ("zhvi_condo", "condo"),
    ("zhvi_1bed", "bed_1"),
    ("zhvi_2bed", "bed_2"),
    ("zhvi_3bed", "bed_3"),
    ("zhvi_4bed", "bed_4"),
    ("zhvi_5bed_plus", "bed_5_plus"),
    ("zhvi_bottom_tier", "bottom_tier"),
    ("zhvi_top_tier", "top_tier"),
];

pub(super) const FAMILY: Family = Family {
    name: "home_value",
    title: "Home Value Index",
    variants: VARIANTS,
    check,
    metadata,
};

fn min_rows(region: RegionType) -> usize {
    match region {
        RegionType::Metro => 10_000,
        RegionType::State => 1_000,
        RegionType::County => 50_000,
        RegionType::City => 100_000,
        RegionType::Zip => 500_000,
    }
}

fn check(table: &Table, region: RegionType) -> Result<(), ValidationError> {
    let values = FAMILY.value_columns();
    check_common(
        table,
        &values,
        &["date", "region_id", "region_name"],
        min_rows(region),
        1990,
    )?;
    check_range(table, &values, Some(0.0), Some(50_000_000.0))
}

fn metadata(region: RegionType, _columns: &[String]) -> DatasetMetadata {
    let label = region.label();
    let mut columns = base_descriptions(region);
    for (column, text) in [
        ("all_homes", "Typical home value for all homes (SFR + Condo), mid-tier (35th-65th percentile)"),
        ("single_family", "Typical home value for single-family residences, mid-tier"),
        ("condo", "Typical home value for condos/co-ops, mid-tier"),
        ("bed_1", "Typical home value for 1-bedroom homes"),
        ("bed_2", "Typical home value for 2-bedroom homes"),
        ("bed_3", "Typical home value for 3-bedroom homes"),
        ("bed_4", "Typical home value for 4-bedroom homes"),
        ("bed_5_plus", "Typical home value for 5+ bedroom homes"),
        ("bottom_tier", "Typical home value for bottom-tier (5th-35th percentile)"),
        ("top_tier", "Typical home value for top-tier (65th-95th percentile)"),
    ] {
        columns.insert(column.to_string(), text.to_string());
    }
    DatasetMetadata {
        id: FAMILY.dataset_id(region),
        title: format!("Zillow Home Value Index by {label}"),
        description: format!(
            "Zillow Home Value Index (ZHVI) by {}. ZHVI is a smoothed, seasonally adjusted \
             measure of the typical home value. Includes different property types (all homes, \
             single-family, condo), bedroom counts (1-5+), and price tiers (bottom, mid, top).",
            label.to_lowercase()
        ),
        column_descriptions: columns,
    }
}
