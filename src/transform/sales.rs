use super::{Family, base_descriptions, check_common, check_range, inventory};
use crate::domain::RegionType;
use crate::table::Table;
use crate::validate::{self, ValidationError};
use crate::warehouse::DatasetMetadata;

pub(super) const FAMILY: Family = Family {
    name: "sales",
    title: "Sales",
    variants: &[
        ("median_list_price", "median_list_price"),
        ("median_sale_price", "median_sale_price"),
        ("sales_count", "sales_count"),
        ("pct_sold_above_list", "pct_sold_above_list"),
        ("pct_sold_below_list", "pct_sold_below_list"),
        ("days_to_pending", "days_to_pending"),
        ("price_cut_share", "pct_price_cut"),
    ],
    check,
    metadata,
};

const PRICES: &[&str] = &["median_list_price", "median_sale_price"];
const PERCENTAGES: &[&str] = &["pct_sold_above_list", "pct_sold_below_list", "pct_price_cut"];

fn check(table: &Table, region: RegionType) -> Result<(), ValidationError> {
    check_common(
        table,
        &FAMILY.value_columns(),
        &["date", "region_id", "region_name"],
        inventory::min_rows(region),
        2010,
    )?;
    check_range(table, PRICES, Some(0.0), Some(100_000_000.0))?;
    for column in PERCENTAGES {
        if table.has_column(column) {
            validate::assert_percentage(table, column)?;
        }
    }
    check_range(table, &["days_to_pending"], Some(0.0), Some(365.0))?;
    check_range(table, &["sales_count"], Some(0.0), None)
}

/// Descriptions are limited to the columns the slice actually produced.
fn metadata(region: RegionType, present: &[String]) -> DatasetMetadata {
    let label = region.label();
    let mut columns = base_descriptions(region);
    for (column, text) in [
        ("median_list_price", "Median list price in USD"),
        ("median_sale_price", "Median sale price in USD"),
        ("sales_count", "Estimated number of sales (nowcast)"),
        ("pct_sold_above_list", "Percent of sales above final list price"),
        ("pct_sold_below_list", "Percent of sales below final list price"),
        ("days_to_pending", "Mean days from listing to pending"),
        ("pct_price_cut", "Percent of listings with a price cut"),
    ] {
        columns.insert(column.to_string(), text.to_string());
    }
    columns.retain(|column, _| present.iter().any(|name| name == column));
    DatasetMetadata {
        id: FAMILY.dataset_id(region),
        title: format!("Zillow Sales Metrics by {label}"),
        description: format!(
            "Zillow sales and pricing metrics by {}. Includes median list/sale prices, sales \
             counts, days to pending, and price cut statistics. Property type is single-family \
             residences and condos.",
            label.to_lowercase()
        ),
        column_descriptions: columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_only_describes_present_columns() {
        let present = ["date", "region_id", "region_name", "state_code", "sales_count"]
            .map(String::from)
            .to_vec();
        let described = metadata(RegionType::Metro, &present);
        assert_eq!(described.column_descriptions.len(), 5);
        assert!(!described.column_descriptions.contains_key("median_list_price"));
        assert_eq!(described.title, "Zillow Sales Metrics by Metro Area (MSA)");
    }
}
