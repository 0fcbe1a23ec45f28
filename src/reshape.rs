//! Wide-to-long reshaping of the monthly source CSVs.
//!
//! A source file has a handful of identifier columns followed by one column per
//! month-end date. Identifier columns are recognised by a header whose first
//! character is not a digit.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;

use crate::domain::RegionType;
use crate::error::ConnectorError;
use crate::table::{Column, ColumnData, Table};

pub const REGION_ID: &str = "RegionID";
pub const REGION_NAME: &str = "RegionName";
pub const REGION_TYPE: &str = "RegionType";
pub const STATE_NAME: &str = "StateName";
pub const SIZE_RANK: &str = "SizeRank";

#[derive(Debug, Clone, PartialEq)]
pub struct WideFrame {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl WideFrame {
    pub fn parse(csv_text: &str) -> Result<Self, ConnectorError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(csv_text.as_bytes());
        let headers = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = (0..headers.len())
                .map(|index| {
                    record
                        .get(index)
                        .map(str::trim)
                        .filter(|cell| !cell.is_empty())
                        .map(str::to_string)
                })
                .collect();
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    fn is_id_header(header: &str) -> bool {
        !header.chars().next().is_some_and(|c| c.is_ascii_digit())
    }

    pub fn id_columns(&self) -> Vec<usize> {
        (0..self.headers.len())
            .filter(|&index| Self::is_id_header(&self.headers[index]))
            .collect()
    }

    pub fn date_columns(&self) -> Vec<usize> {
        (0..self.headers.len())
            .filter(|&index| !Self::is_id_header(&self.headers[index]))
            .collect()
    }

    /// One output row per input row per date column, in row-major order.
    pub fn melt(&self, value_column: &str) -> LongFrame {
        let ids = self.id_columns();
        let dates = self.date_columns();
        let mut rows = Vec::with_capacity(self.rows.len() * dates.len());
        for row in &self.rows {
            let id_values = ids.iter().map(|&index| row[index].clone()).collect::<Vec<_>>();
            for &date in &dates {
                rows.push(LongRow {
                    ids: id_values.clone(),
                    date: self.headers[date].clone(),
                    values: vec![row[date].clone()],
                });
            }
        }
        LongFrame {
            id_columns: ids.iter().map(|&index| self.headers[index].clone()).collect(),
            value_columns: vec![value_column.to_string()],
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub ids: Vec<Option<String>>,
    pub date: String,
    pub values: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LongFrame {
    pub id_columns: Vec<String>,
    pub value_columns: Vec<String>,
    pub rows: Vec<LongRow>,
}

impl LongFrame {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    fn id_index(&self, name: &str) -> Option<usize> {
        self.id_columns.iter().position(|column| column == name)
    }
}

/// Outer join of melted variants on `(RegionID, date)`.
///
/// Identifier values come from the first variant that carries the key; later
/// variants only fill identifiers that are still missing.
pub fn merge_variants(frames: Vec<LongFrame>) -> LongFrame {
    let mut frames = frames.into_iter();
    let Some(mut merged) = frames.next() else {
        return LongFrame::default();
    };

    let mut index = HashMap::new();
    let region_pos = merged.id_index(REGION_ID);
    for (row_index, row) in merged.rows.iter().enumerate() {
        let region = region_pos.and_then(|pos| row.ids[pos].clone());
        index.entry((region, row.date.clone())).or_insert(row_index);
    }

    for frame in frames {
        for column in &frame.id_columns {
            if merged.id_index(column).is_none() {
                merged.id_columns.push(column.clone());
                for row in &mut merged.rows {
                    row.ids.push(None);
                }
            }
        }
        let id_map = frame
            .id_columns
            .iter()
            .map(|column| merged.id_index(column).unwrap_or_default())
            .collect::<Vec<_>>();
        let value_offset = merged.value_columns.len();
        let width = frame.value_columns.len();
        merged.value_columns.extend(frame.value_columns.iter().cloned());
        for row in &mut merged.rows {
            row.values.resize(value_offset + width, None);
        }

        let region_pos = frame.id_index(REGION_ID);
        let id_count = merged.id_columns.len();
        for row in frame.rows {
            let region = region_pos.and_then(|pos| row.ids[pos].clone());
            let key = (region, row.date.clone());
            match index.get(&key) {
                Some(&target) => {
                    let existing = &mut merged.rows[target];
                    for (source, &dest) in id_map.iter().enumerate() {
                        if existing.ids[dest].is_none() {
                            existing.ids[dest] = row.ids[source].clone();
                        }
                    }
                    for (offset, value) in row.values.into_iter().enumerate() {
                        existing.values[value_offset + offset] = value;
                    }
                }
                None => {
                    let mut ids = vec![None; id_count];
                    for (source, &dest) in id_map.iter().enumerate() {
                        ids[dest] = row.ids[source].clone();
                    }
                    let mut values = vec![None; value_offset];
                    values.extend(row.values);
                    index.insert(key, merged.rows.len());
                    merged.rows.push(LongRow {
                        ids,
                        date: row.date,
                        values,
                    });
                }
            }
        }
    }
    merged
}

/// Parses the source's date headers: ISO, `M/D/YYYY`, `YYYY/MM/DD` or `M/D/YY`.
pub fn parse_source_date(raw: &str) -> Result<NaiveDate, ConnectorError> {
    let raw = raw.trim();
    let text = raw.get(..10).filter(|_| raw.contains(' ') || raw.contains('T')).unwrap_or(raw);
    let format = if text.contains('-') {
        "%Y-%m-%d"
    } else {
        let parts = text.split('/').collect::<Vec<_>>();
        match parts.as_slice() {
            [year, _, _] if year.len() == 4 => "%Y/%m/%d",
            [_, _, year] if year.len() == 4 => "%m/%d/%Y",
            [_, _, _] => "%m/%d/%y",
            _ => return Err(ConnectorError::InvalidDate(raw.to_string())),
        }
    };
    NaiveDate::parse_from_str(text, format).map_err(|_| ConnectorError::InvalidDate(raw.to_string()))
}

fn parse_value(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Filters to one granularity and produces the canonical typed table:
/// `region_id`, `region_name`, extra identifiers, `state_code` (not for states),
/// `date` as `YYYY-MM-DD`, then the numeric value columns, sorted by
/// `(date, region_name)`. Rows whose values are all missing are dropped.
pub fn standardize_columns(frame: &LongFrame, region: RegionType) -> Result<Table, ConnectorError> {
    let type_pos = frame.id_index(REGION_TYPE);
    let mut rows = frame
        .rows
        .iter()
        .filter(|row| match type_pos {
            Some(pos) => row.ids[pos]
                .as_deref()
                .is_some_and(|value| value.to_lowercase() == region.row_filter()),
            None => true,
        })
        .map(|row| {
            let date = parse_source_date(&row.date)?;
            let values = row
                .values
                .iter()
                .map(|value| parse_value(value.as_deref()))
                .collect::<Vec<_>>();
            Ok((row, date.format("%Y-%m-%d").to_string(), values))
        })
        .collect::<Result<Vec<_>, ConnectorError>>()?;

    if !frame.value_columns.is_empty() {
        rows.retain(|(_, _, values)| values.iter().any(Option::is_some));
    }
    if rows.is_empty() {
        return Ok(Table::default());
    }

    let name_pos = frame.id_index(REGION_NAME);
    rows.sort_by(|(a, a_date, _), (b, b_date, _)| {
        a_date.cmp(b_date).then_with(|| {
            let a_name = name_pos.and_then(|pos| a.ids[pos].as_deref());
            let b_name = name_pos.and_then(|pos| b.ids[pos].as_deref());
            match (a_name, b_name) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
    });

    let mut columns = Vec::new();
    for (pos, name) in frame.id_columns.iter().enumerate() {
        let cells = rows.iter().map(|(row, _, _)| row.ids[pos].clone());
        match name.as_str() {
            SIZE_RANK | REGION_TYPE => continue,
            REGION_ID => columns.push(Column::new(
                "region_id",
                ColumnData::Int64(cells.map(|cell| cell.and_then(|v| parse_id(&v))).collect()),
            )),
            REGION_NAME => columns.push(Column::new("region_name", ColumnData::String(cells.collect()))),
            STATE_NAME => {
                if region.has_parent_state() {
                    columns.push(Column::new(
                        "state_code",
                        ColumnData::String(cells.map(|cell| Some(cell.unwrap_or_default())).collect()),
                    ));
                }
            }
            other => columns.push(Column::new(other, ColumnData::String(cells.collect()))),
        }
    }
    columns.push(Column::new(
        "date",
        ColumnData::String(rows.iter().map(|(_, date, _)| Some(date.clone())).collect()),
    ));
    for (pos, name) in frame.value_columns.iter().enumerate() {
        columns.push(Column::new(
            name.clone(),
            ColumnData::Double(rows.iter().map(|(_, _, values)| values[pos]).collect()),
        ));
    }
    Table::new(columns)
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.fract() == 0.0)
            .map(|value| value as i64)
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const METRO_CSV: &str = "RegionID,SizeRank,RegionName,RegionType,StateName,2020-01-31,2020-02-29\n\
        394913,1,\"New York, NY\",msa,NY,500000.5,501000\n\
        753899,2,\"Los Angeles, CA\",msa,CA,700000,\n";

    #[test]
    fn splits_identifier_and_date_columns() {
        let frame = WideFrame::parse(METRO_CSV).unwrap();
        assert_eq!(frame.id_columns(), vec![0, 1, 2, 3, 4]);
        assert_eq!(frame.date_columns(), vec![5, 6]);
    }

    #[test]
    fn melt_emits_rows_times_dates() {
        let frame = WideFrame::parse(METRO_CSV).unwrap();
        let long = frame.melt("all_homes");
        assert_eq!(long.len(), 4);
        assert_eq!(long.rows[1].date, "2020-02-29");
        assert_eq!(long.rows[3].values, vec![None]);
    }

    #[test]
    fn parses_source_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        assert_eq!(parse_source_date("2020-01-31").unwrap(), expected);
        assert_eq!(parse_source_date("1/31/2020").unwrap(), expected);
        assert_eq!(parse_source_date("2020/01/31").unwrap(), expected);
        assert_eq!(parse_source_date("1/31/20").unwrap(), expected);
        assert_matches!(parse_source_date("January"), Err(ConnectorError::InvalidDate(_)));
    }

    #[test]
    fn merge_is_an_outer_join() {
        let first = WideFrame::parse("RegionID,RegionName,2020-01-31\n1,A,10\n")
            .unwrap()
            .melt("a");
        let second = WideFrame::parse("RegionID,RegionName,2020-01-31,2020-02-29\n1,A,20,21\n2,B,30,31\n")
            .unwrap()
            .melt("b");
        let merged = merge_variants(vec![first, second]);
        assert_eq!(merged.value_columns, vec!["a", "b"]);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.rows[0].values, vec![Some("10".to_string()), Some("20".to_string())]);
        let late = merged
            .rows
            .iter()
            .find(|row| row.ids[0].as_deref() == Some("2"))
            .unwrap();
        assert_eq!(late.ids[1].as_deref(), Some("B"));
        assert_eq!(late.values[0], None);
    }

    #[test]
    fn state_granularity_drops_state_code() {
        let csv = "RegionID,SizeRank,RegionName,RegionType,StateName,2020-01-31\n9,1,Texas,state,,1.5\n";
        let long = WideFrame::parse(csv).unwrap().melt("rent");
        let table = standardize_columns(&long, RegionType::State).unwrap();
        assert_eq!(table.column_names(), vec!["region_id", "region_name", "date", "rent"]);
    }
}
