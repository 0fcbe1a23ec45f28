//! Parquet encoding for [`Table`] via arrow record batches.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, NullArray, StringArray};
use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::error::ConnectorError;
use crate::table::{Column, ColumnData, DataType, Field, Table};

const ARROW_SCHEMA_KEY: &str = "ARROW:schema";

pub type FileMetadata = BTreeMap<String, String>;

fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::String => ArrowType::Utf8,
        DataType::Int64 => ArrowType::Int64,
        DataType::Double => ArrowType::Float64,
        DataType::Null => ArrowType::Null,
    }
}

fn table_type(data_type: &ArrowType) -> DataType {
    match data_type {
        ArrowType::Null => DataType::Null,
        ArrowType::Int8
        | ArrowType::Int16
        | ArrowType::Int32
        | ArrowType::Int64
        | ArrowType::UInt8
        | ArrowType::UInt16
        | ArrowType::UInt32 => DataType::Int64,
        ArrowType::Float16 | ArrowType::Float32 | ArrowType::Float64 => DataType::Double,
        _ => DataType::String,
    }
}

fn arrow_schema(table: &Table) -> SchemaRef {
    Arc::new(Schema::new(
        table
            .columns()
            .iter()
            .map(|column| {
                ArrowField::new(column.name.clone(), arrow_type(column.data.data_type()), true)
            })
            .collect::<Vec<_>>(),
    ))
}

fn to_array(data: &ColumnData) -> ArrayRef {
    match data {
        ColumnData::String(values) => Arc::new(StringArray::from(
            values.iter().map(|value| value.as_deref()).collect::<Vec<_>>(),
        )),
        ColumnData::Int64(values) => Arc::new(Int64Array::from(values.clone())),
        ColumnData::Double(values) => Arc::new(Float64Array::from(values.clone())),
        ColumnData::Null(len) => Arc::new(NullArray::new(*len)),
    }
}

fn from_array(array: &ArrayRef) -> Result<ColumnData, ConnectorError> {
    let target = table_type(array.data_type());
    let array = if array.data_type() == &arrow_type(target) {
        array.clone()
    } else {
        arrow::compute::cast(array, &arrow_type(target))
            .map_err(|err| ConnectorError::Columnar(format!("cast failed: {err}")))?
    };
    let downcast_err = || ConnectorError::Columnar("unexpected array type".to_string());
    Ok(match target {
        DataType::String => {
            let values = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(downcast_err)?;
            ColumnData::String(values.iter().map(|v| v.map(str::to_string)).collect())
        }
        DataType::Int64 => {
            let values = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(downcast_err)?;
            ColumnData::Int64(values.iter().collect())
        }
        DataType::Double => {
            let values = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(downcast_err)?;
            ColumnData::Double(values.iter().collect())
        }
        DataType::Null => ColumnData::Null(array.len()),
    })
}

pub fn to_record_batch(table: &Table) -> Result<RecordBatch, ConnectorError> {
    let schema = arrow_schema(table);
    let arrays = table
        .columns()
        .iter()
        .map(|column| to_array(&column.data))
        .collect::<Vec<_>>();
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    RecordBatch::try_new(schema, arrays)
        .map_err(|err| ConnectorError::Columnar(format!("record batch build failed: {err}")))
}

/// Serializes `table` to parquet bytes with `metadata` stored as file key/value pairs.
pub fn encode(table: &Table, metadata: &FileMetadata) -> Result<Vec<u8>, ConnectorError> {
    let batch = to_record_batch(table)?;
    let key_values = metadata
        .iter()
        .map(|(key, value)| KeyValue {
            key: key.clone(),
            value: Some(value.clone()),
        })
        .collect::<Vec<_>>();
    let props = WriterProperties::builder()
        .set_key_value_metadata((!key_values.is_empty()).then_some(key_values))
        .build();

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, batch.schema(), Some(props))
        .map_err(|err| ConnectorError::Columnar(format!("parquet writer init failed: {err}")))?;
    writer
        .write(&batch)
        .map_err(|err| ConnectorError::Columnar(format!("parquet write failed: {err}")))?;
    writer
        .close()
        .map_err(|err| ConnectorError::Columnar(format!("parquet close failed: {err}")))?;
    Ok(cursor.into_inner())
}

pub fn decode(bytes: Vec<u8>) -> Result<(Table, FileMetadata), ConnectorError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .map_err(|err| ConnectorError::Columnar(format!("parquet reader init failed: {err}")))?;

    let metadata = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|pairs| {
            pairs
                .iter()
                .filter(|pair| pair.key != ARROW_SCHEMA_KEY)
                .map(|pair| (pair.key.clone(), pair.value.clone().unwrap_or_default()))
                .collect::<FileMetadata>()
        })
        .unwrap_or_default();
    let schema = builder
        .schema()
        .fields()
        .iter()
        .map(|field| Field::new(field.name().clone(), table_type(field.data_type())))
        .collect::<Vec<_>>();

    let reader = builder
        .build()
        .map_err(|err| ConnectorError::Columnar(format!("parquet reader build failed: {err}")))?;
    let mut table = Table::empty(&schema);
    for batch in reader {
        let batch = batch
            .map_err(|err| ConnectorError::Columnar(format!("parquet read batch failed: {err}")))?;
        let columns = batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| Ok(Column::new(field.name().clone(), from_array(array)?)))
            .collect::<Result<Vec<_>, ConnectorError>>()?;
        table = table.concat(&Table::new(columns)?)?;
    }
    Ok((table, metadata))
}
