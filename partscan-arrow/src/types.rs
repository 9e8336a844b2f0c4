use std::{collections::HashMap, sync::Arc};

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef};
use partscan_core::{ColumnType, Field, Schema};

/// Field metadata key recording the declared column type inside an encoded unit, so that
/// `timestamp` columns survive the round trip even though they are stored as strings.
pub const COLUMN_TYPE_KEY: &str = "partscan.column_type";

pub fn arrow_type(column_type: ColumnType) -> DataType {
  match column_type {
    ColumnType::Utf8 | ColumnType::Timestamp => DataType::Utf8,
    ColumnType::Int64 => DataType::Int64,
    ColumnType::Int32 => DataType::Int32,
  }
}

pub fn arrow_field(field: &Field) -> ArrowField {
  ArrowField::new(&field.name, arrow_type(field.column_type), field.nullable).with_metadata(
    HashMap::from([(COLUMN_TYPE_KEY.to_string(), field.column_type.to_string())]),
  )
}

pub fn arrow_schema(schema: &Schema) -> SchemaRef {
  Arc::new(ArrowSchema::new(
    schema.fields().iter().map(arrow_field).collect::<Vec<_>>(),
  ))
}

/// Declared type of an encoded column, falling back to the physical type for files written
/// elsewhere.
pub fn declared_type(field: &ArrowField) -> Option<ColumnType> {
  if let Some(declared) = field.metadata().get(COLUMN_TYPE_KEY) {
    return declared.parse().ok();
  }
  match field.data_type() {
    DataType::Utf8 | DataType::LargeUtf8 => Some(ColumnType::Utf8),
    DataType::Int64 => Some(ColumnType::Int64),
    DataType::Int32 => Some(ColumnType::Int32),
    _ => None,
  }
}
