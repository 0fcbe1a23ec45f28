//! In-memory columnar table shared by the transform, validation and storage layers.
//!
//! Columns are typed and nullable. The type names printed by [`DataType`] are the
//! vocabulary validation schemas match against (`string`, `int64`, `double`, `null`).

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int64,
    Double,
    Null,
}

impl DataType {
    /// Common type two columns can both be widened to, if any.
    pub fn unify(self, other: DataType) -> Option<DataType> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (DataType::Null, other) | (other, DataType::Null) => Some(other),
            (DataType::Int64, DataType::Double) | (DataType::Double, DataType::Int64) => {
                Some(DataType::Double)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Double => write!(f, "double"),
            DataType::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Null,
    Str(&'a str),
    Int(i64),
    Double(f64),
}

impl Value<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Hashable rendering used for key comparisons; distinct types never collide.
    pub fn key_repr(&self) -> String {
        match self {
            Value::Null => "\u{0}".to_string(),
            Value::Str(value) => format!("s:{value}"),
            Value::Int(value) => format!("i:{value}"),
            Value::Double(value) => format!("d:{}", value.to_bits()),
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Str(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    String(Vec<Option<String>>),
    Int64(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Null(usize),
}

impl ColumnData {
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::String => ColumnData::String(Vec::new()),
            DataType::Int64 => ColumnData::Int64(Vec::new()),
            DataType::Double => ColumnData::Double(Vec::new()),
            DataType::Null => ColumnData::Null(0),
        }
    }

    pub fn nulls(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::String => ColumnData::String(vec![None; len]),
            DataType::Int64 => ColumnData::Int64(vec![None; len]),
            DataType::Double => ColumnData::Double(vec![None; len]),
            DataType::Null => ColumnData::Null(len),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::String(values) => values.len(),
            ColumnData::Int64(values) => values.len(),
            ColumnData::Double(values) => values.len(),
            ColumnData::Null(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::String(_) => DataType::String,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Double(_) => DataType::Double,
            ColumnData::Null(_) => DataType::Null,
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::String(values) => values.iter().filter(|value| value.is_none()).count(),
            ColumnData::Int64(values) => values.iter().filter(|value| value.is_none()).count(),
            ColumnData::Double(values) => values.iter().filter(|value| value.is_none()).count(),
            ColumnData::Null(len) => *len,
        }
    }

    pub fn value(&self, index: usize) -> Value<'_> {
        match self {
            ColumnData::String(values) => values[index]
                .as_deref()
                .map(Value::Str)
                .unwrap_or(Value::Null),
            ColumnData::Int64(values) => values[index].map(Value::Int).unwrap_or(Value::Null),
            ColumnData::Double(values) => values[index].map(Value::Double).unwrap_or(Value::Null),
            ColumnData::Null(_) => Value::Null,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Value<'_>> + '_ {
        (0..self.len()).map(move |index| self.value(index))
    }

    /// Appends one value; integers widen into double columns, anything else must match.
    pub fn push(&mut self, value: Value<'_>) -> Result<(), ConnectorError> {
        match (self, value) {
            (ColumnData::String(values), Value::Str(value)) => values.push(Some(value.to_string())),
            (ColumnData::String(values), Value::Null) => values.push(None),
            (ColumnData::Int64(values), Value::Int(value)) => values.push(Some(value)),
            (ColumnData::Int64(values), Value::Null) => values.push(None),
            (ColumnData::Double(values), Value::Double(value)) => values.push(Some(value)),
            (ColumnData::Double(values), Value::Int(value)) => values.push(Some(value as f64)),
            (ColumnData::Double(values), Value::Null) => values.push(None),
            (ColumnData::Null(len), Value::Null) => *len += 1,
            (column, value) => {
                return Err(ConnectorError::SchemaMismatch {
                    column: "<value>".to_string(),
                    existing: column.data_type().to_string(),
                    incoming: value_type(&value).to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn cast(&self, target: DataType) -> Option<ColumnData> {
        match (self, target) {
            (column, target) if column.data_type() == target => Some(column.clone()),
            (ColumnData::Null(len), target) => Some(ColumnData::nulls(target, *len)),
            (ColumnData::Int64(values), DataType::Double) => Some(ColumnData::Double(
                values.iter().map(|value| value.map(|v| v as f64)).collect(),
            )),
            _ => None,
        }
    }

    pub fn take(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::String(values) => {
                ColumnData::String(indices.iter().map(|&i| values[i].clone()).collect())
            }
            ColumnData::Int64(values) => {
                ColumnData::Int64(indices.iter().map(|&i| values[i]).collect())
            }
            ColumnData::Double(values) => {
                ColumnData::Double(indices.iter().map(|&i| values[i]).collect())
            }
            ColumnData::Null(_) => ColumnData::Null(indices.len()),
        }
    }

    fn extend(&mut self, other: ColumnData) -> Result<(), ConnectorError> {
        match (self, other) {
            (ColumnData::String(values), ColumnData::String(more)) => values.extend(more),
            (ColumnData::Int64(values), ColumnData::Int64(more)) => values.extend(more),
            (ColumnData::Double(values), ColumnData::Double(more)) => values.extend(more),
            (ColumnData::Null(len), ColumnData::Null(more)) => *len += more,
            (column, other) => {
                return Err(ConnectorError::SchemaMismatch {
                    column: "<extend>".to_string(),
                    existing: column.data_type().to_string(),
                    incoming: other.data_type().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Approximate in-memory footprint in the layout a columnar engine would use.
    pub fn byte_size(&self) -> usize {
        let validity = self.len().div_ceil(8);
        match self {
            ColumnData::String(values) => {
                validity
                    + values
                        .iter()
                        .map(|value| value.as_ref().map(String::len).unwrap_or(0) + 4)
                        .sum::<usize>()
            }
            ColumnData::Int64(values) => validity + values.len() * 8,
            ColumnData::Double(values) => validity + values.len() * 8,
            ColumnData::Null(_) => 0,
        }
    }
}

fn value_type(value: &Value<'_>) -> DataType {
    match value {
        Value::Null => DataType::Null,
        Value::Str(_) => DataType::String,
        Value::Int(_) => DataType::Int64,
        Value::Double(_) => DataType::Double,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn strings<S: Into<String>>(name: &str, values: Vec<Option<S>>) -> Self {
        Self::new(
            name,
            ColumnData::String(values.into_iter().map(|v| v.map(Into::into)).collect()),
        )
    }

    pub fn int64(name: &str, values: Vec<Option<i64>>) -> Self {
        Self::new(name, ColumnData::Int64(values))
    }

    pub fn double(name: &str, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Double(values))
    }

    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.data.data_type())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableProfile {
    pub rows: usize,
    pub size_bytes: usize,
    pub columns: Vec<String>,
    pub null_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, ConnectorError> {
        let num_rows = columns.first().map(|column| column.data.len()).unwrap_or(0);
        if let Some(column) = columns.iter().find(|column| column.data.len() != num_rows) {
            return Err(ConnectorError::RaggedTable(format!(
                "column {} has {} rows, expected {num_rows}",
                column.name,
                column.data.len()
            )));
        }
        Ok(Self { columns, num_rows })
    }

    pub fn empty(schema: &[Field]) -> Self {
        Self {
            columns: schema
                .iter()
                .map(|field| Column::new(field.name.clone(), ColumnData::empty(field.data_type)))
                .collect(),
            num_rows: 0,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn schema(&self) -> Vec<Field> {
        self.columns.iter().map(Column::field).collect()
    }

    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(|column| column.data.byte_size()).sum()
    }

    /// Null counts for the columns that have any.
    pub fn null_counts(&self) -> BTreeMap<String, usize> {
        self.columns
            .iter()
            .map(|column| (column.name.clone(), column.data.null_count()))
            .filter(|(_, nulls)| *nulls > 0)
            .collect()
    }

    pub fn profile(&self) -> TableProfile {
        TableProfile {
            rows: self.num_rows,
            size_bytes: self.byte_size(),
            columns: self.column_names(),
            null_counts: self.null_counts(),
        }
    }

    pub fn row_key(&self, row: usize, key_columns: &[usize]) -> String {
        key_columns
            .iter()
            .map(|&index| self.columns[index].data.value(row).key_repr())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    pub fn key_indices(&self, key: &[String]) -> Result<Vec<usize>, ConnectorError> {
        key.iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| ConnectorError::MergeKeyColumn(name.clone()))
            })
            .collect()
    }

    pub fn take(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|column| Column::new(column.name.clone(), column.data.take(indices)))
                .collect(),
            num_rows: indices.len(),
        }
    }

    /// Reorders, widens and null-fills columns so the table has exactly `schema`.
    pub fn conform(&self, schema: &[Field]) -> Result<Table, ConnectorError> {
        let columns = schema
            .iter()
            .map(|field| match self.column(&field.name) {
                Some(column) => column
                    .data
                    .cast(field.data_type)
                    .map(|data| Column::new(field.name.clone(), data))
                    .ok_or_else(|| ConnectorError::SchemaMismatch {
                        column: field.name.clone(),
                        existing: column.data.data_type().to_string(),
                        incoming: field.data_type.to_string(),
                    }),
                None => Ok(Column::new(
                    field.name.clone(),
                    ColumnData::nulls(field.data_type, self.num_rows),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table {
            columns,
            num_rows: self.num_rows,
        })
    }

    /// Rows of `self` followed by rows of `other`, over the union of both schemas.
    pub fn concat(&self, other: &Table) -> Result<Table, ConnectorError> {
        let schema = unify_schema(&self.schema(), &other.schema())?;
        let mut combined = self.conform(&schema)?;
        let other = other.conform(&schema)?;
        for (column, more) in combined.columns.iter_mut().zip(other.columns) {
            column.data.extend(more.data)?;
        }
        combined.num_rows += other.num_rows;
        Ok(combined)
    }

    /// Upsert `source` into `self`: rows whose key matches are updated with the
    /// source's columns, the rest of the source is inserted after the existing rows.
    pub fn upsert(&self, source: &Table, key: &[String]) -> Result<Table, ConnectorError> {
        let schema = unify_schema(&self.schema(), &source.schema())?;
        let target = self.conform(&schema)?;
        let incoming = source.conform(&schema)?;
        let target_key = target.key_indices(key)?;
        let source_key = incoming.key_indices(key)?;

        let mut source_rows = HashMap::new();
        for row in 0..incoming.num_rows {
            source_rows.insert(incoming.row_key(row, &source_key), row);
        }

        enum Origin {
            Target(usize),
            Updated(usize, usize),
            Inserted(usize),
        }

        let mut matched = vec![false; incoming.num_rows];
        let mut plan = Vec::with_capacity(target.num_rows + incoming.num_rows);
        for row in 0..target.num_rows {
            match source_rows.get(&target.row_key(row, &target_key)) {
                Some(&source_row) => {
                    matched[source_row] = true;
                    plan.push(Origin::Updated(row, source_row));
                }
                None => plan.push(Origin::Target(row)),
            }
        }
        let mut seen = HashMap::new();
        for row in 0..incoming.num_rows {
            if matched[row] {
                continue;
            }
            let row_key = incoming.row_key(row, &source_key);
            if source_rows.get(&row_key) == Some(&row) && seen.insert(row_key, row).is_none() {
                plan.push(Origin::Inserted(row));
            }
        }

        let mut columns = Vec::with_capacity(schema.len());
        for (index, field) in schema.iter().enumerate() {
            let from_source = source.has_column(&field.name);
            let target_data = &target.columns[index].data;
            let source_data = &incoming.columns[index].data;
            let mut data = ColumnData::empty(field.data_type);
            for origin in &plan {
                let value = match *origin {
                    Origin::Target(row) => target_data.value(row),
                    Origin::Updated(row, source_row) => {
                        if from_source {
                            source_data.value(source_row)
                        } else {
                            target_data.value(row)
                        }
                    }
                    Origin::Inserted(source_row) => source_data.value(source_row),
                };
                data.push(value)?;
            }
            columns.push(Column::new(field.name.clone(), data));
        }
        Table::new(columns)
    }
}

/// Union of two schemas: `base` order first, new columns appended, shared columns widened.
pub fn unify_schema(base: &[Field], incoming: &[Field]) -> Result<Vec<Field>, ConnectorError> {
    let mut schema = base.to_vec();
    for field in incoming {
        match schema.iter_mut().find(|existing| existing.name == field.name) {
            Some(existing) => {
                existing.data_type = existing.data_type.unify(field.data_type).ok_or_else(|| {
                    ConnectorError::SchemaMismatch {
                        column: field.name.clone(),
                        existing: existing.data_type.to_string(),
                        incoming: field.data_type.to_string(),
                    }
                })?;
            }
            None => schema.push(field.clone()),
        }
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column::int64("id", vec![Some(1), Some(2)]),
            Column::strings("name", vec![Some("a"), None]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Table::new(vec![
            Column::int64("id", vec![Some(1)]),
            Column::double("v", vec![]),
        ])
        .unwrap_err();
        assert_matches!(err, ConnectorError::RaggedTable(_));
    }

    #[test]
    fn concat_widens_and_adds_columns() {
        let other = Table::new(vec![
            Column::double("id", vec![Some(3.5)]),
            Column::strings("extra", vec![Some("x")]),
        ])
        .unwrap();
        let combined = sample().concat(&other).unwrap();
        assert_eq!(combined.num_rows(), 3);
        assert_eq!(combined.column_names(), vec!["id", "name", "extra"]);
        assert_eq!(combined.column("id").unwrap().data.data_type(), DataType::Double);
        assert_eq!(combined.column("extra").unwrap().data.null_count(), 2);
    }

    #[test]
    fn upsert_updates_matches_and_inserts_the_rest() {
        let source = Table::new(vec![
            Column::int64("id", vec![Some(2), Some(5)]),
            Column::strings("name", vec![Some("b"), Some("e")]),
        ])
        .unwrap();
        let merged = sample().upsert(&source, &["id".to_string()]).unwrap();
        assert_eq!(merged.num_rows(), 3);
        let names = merged
            .column("name")
            .unwrap()
            .data
            .values()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "e"]);
    }

    #[test]
    fn incompatible_types_do_not_unify() {
        let err = unify_schema(
            &[Field::new("a", DataType::String)],
            &[Field::new("a", DataType::Int64)],
        )
        .unwrap_err();
        assert_matches!(err, ConnectorError::SchemaMismatch { .. });
    }
}
