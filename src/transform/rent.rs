use super::{Family, base_descriptions, check_common, check_range};
use crate::domain::RegionType;
use crate::table::Table;
use crate::validate::{self, ValidationError};
use crate::warehouse::DatasetMetadata;

pub(super) const FAMILY: Family = Family {
    name: "rent",
    title: "Rent Index",
    variants: &[("zori", "rent")],
    check,
    metadata,
};

fn min_rows(region: RegionType) -> usize {
    match region {
        RegionType::Metro => 5_000,
        RegionType::State => 500,
        RegionType::County => 10_000,
        RegionType::City => 50_000,
        RegionType::Zip => 100_000,
    }
}

fn check(table: &Table, region: RegionType) -> Result<(), ValidationError> {
    check_common(
        table,
        &["rent"],
        &["date", "region_id", "region_name", "rent"],
        min_rows(region),
        2010,
    )?;
    validate::assert_positive(table, "rent", false)?;
    check_range(table, &["rent"], Some(100.0), Some(200_000.0))
}

fn metadata(region: RegionType, _columns: &[String]) -> DatasetMetadata {
    let label = region.label();
    let mut columns = base_descriptions(region);
    columns.insert("rent".to_string(), "Typical monthly rent in USD".to_string());
    DatasetMetadata {
        id: FAMILY.dataset_id(region),
        title: format!("Zillow Observed Rent Index by {label}"),
        description: format!(
            "Zillow Observed Rent Index (ZORI) by {}. ZORI is a smoothed, seasonally adjusted \
             measure of the typical observed market rate rent. Includes single-family, condo, \
             and multifamily rentals.",
            label.to_lowercase()
        ),
        column_descriptions: columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn state_metadata_has_no_state_code() {
        let state = metadata(RegionType::State, &[]);
        assert_eq!(state.id, "zillow_rent_state");
        assert!(!state.column_descriptions.contains_key("state_code"));
        assert!(metadata(RegionType::Zip, &[]).column_descriptions.contains_key("state_code"));
    }

    #[test]
    fn rejects_implausibly_low_rent() {
        let table = Table::new(vec![
            Column::int64("region_id", vec![Some(1)]),
            Column::strings("region_name", vec![Some("Texas")]),
            Column::strings("date", vec![Some("2020-01-31")]),
            Column::double("rent", vec![Some(50.0)]),
        ])
        .unwrap();
        let err = check(&table, RegionType::State).unwrap_err();
        assert!(matches!(err, ValidationError::TooFewRows { expected: 500, actual: 1 }));

        let err = check_range(&table, &["rent"], Some(100.0), Some(200_000.0)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValues { ref column, .. } if column == "rent"));
    }
}
