use super::{Family, base_descriptions, check_common, check_range};
use crate::domain::RegionType;
use crate::table::Table;
use crate::validate::ValidationError;
use crate::warehouse::DatasetMetadata;

pub(super) const FAMILY: Family = Family {
    name: "inventory",
    title: "Inventory",
    variants: &[
        ("inventory_for_sale", "for_sale_inventory"),
        ("new_listings", "new_listings"),
        ("new_pending", "new_pending"),
    ],
    check,
    metadata,
};

pub(super) fn min_rows(region: RegionType) -> usize {
    match region {
        RegionType::Metro => 5_000,
        RegionType::State => 500,
        RegionType::County => 20_000,
        RegionType::City => 50_000,
        RegionType::Zip => 100_000,
    }
}

fn check(table: &Table, region: RegionType) -> Result<(), ValidationError> {
    let values = FAMILY.value_columns();
    check_common(
        table,
        &values,
        &["date", "region_id", "region_name"],
        min_rows(region),
        2010,
    )?;
    check_range(table, &values, Some(0.0), Some(10_000_000.0))
}

fn metadata(region: RegionType, _columns: &[String]) -> DatasetMetadata {
    let label = region.label();
    let mut columns = base_descriptions(region);
    columns.insert(
        "for_sale_inventory".to_string(),
        "Number of for-sale listings active during the month".to_string(),
    );
    columns.insert(
        "new_listings".to_string(),
        "Number of new listings during the month".to_string(),
    );
    columns.insert(
        "new_pending".to_string(),
        "Number of listings that went pending during the month".to_string(),
    );
    DatasetMetadata {
        id: FAMILY.dataset_id(region),
        title: format!("Zillow Housing Inventory by {label}"),
        description: format!(
            "Zillow housing inventory metrics by {}. Includes for-sale inventory count, new \
             listings count, and new pending sales count. Property type is single-family \
             residences and condos.",
            label.to_lowercase()
        ),
        column_descriptions: columns,
    }
}
