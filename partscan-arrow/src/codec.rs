//! Conversion between row encoded units and column encoded (parquet) units.
//!
//! Encoding is the only pass in the system that materializes every field of every row. It runs
//! once per unit at ingestion time, validates each value against the declared schema, and writes
//! one column chunk per column plus a footer describing names, types, row counts and byte ranges.
//! Decoding reads the footer, then only the byte ranges of the wanted columns.

use std::{
  fs::{self, File},
  ops::Range,
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
};

use arrow::{
  array::{Array, ArrayRef, AsArray, RecordBatch},
  compute::concat,
  datatypes::SchemaRef,
};
use chrono::NaiveDateTime;
use parquet::{
  arrow::{
    arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    ArrowWriter, ProjectionMask,
  },
  basic::{Compression as ParquetCompression, ZstdLevel},
  file::{metadata::ParquetMetaData, properties::WriterProperties},
};
use partscan_core::{ColumnType, Error, Result, Schema};
use tracing::debug;

use crate::{
  rows::{CsvOptions, RowUnit},
  types::{arrow_schema, declared_type},
};

pub const DEFAULT_ROW_GROUP_SIZE: usize = 128 * 1024;

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
  None,
  Snappy,
  Zstd,
}

impl Compression {
  fn to_parquet(self) -> ParquetCompression {
    match self {
      Compression::None => ParquetCompression::UNCOMPRESSED,
      Compression::Snappy => ParquetCompression::SNAPPY,
      Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
    }
  }
}

impl FromStr for Compression {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "none" | "uncompressed" => Ok(Compression::None),
      "snappy" => Ok(Compression::Snappy),
      "zstd" => Ok(Compression::Zstd),
      other => Err(format!("unknown compression {other:?}")),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
  pub compression: Compression,
  pub row_group_size: usize,
  pub csv: CsvOptions,
}

impl Default for EncodeOptions {
  fn default() -> Self {
    EncodeOptions {
      compression: Compression::Snappy,
      row_group_size: DEFAULT_ROW_GROUP_SIZE,
      csv: CsvOptions::default(),
    }
  }
}

impl EncodeOptions {
  pub fn with_compression(mut self, compression: Compression) -> Self {
    self.compression = compression;
    self
  }

  pub fn with_row_group_size(mut self, row_group_size: usize) -> Self {
    self.row_group_size = row_group_size.max(1);
    self
  }

  pub fn with_csv(mut self, csv: CsvOptions) -> Self {
    self.csv = csv;
    self
  }

  fn writer_properties(&self) -> WriterProperties {
    WriterProperties::builder()
      .set_compression(self.compression.to_parquet())
      .set_max_row_group_size(self.row_group_size)
      .build()
  }
}

/// Metadata of one column of an encoded unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
  pub name: String,
  pub column_type: Option<ColumnType>,
  /// Byte range of each of the column's chunks, one per row group.
  pub chunks: Vec<Range<u64>>,
}

/// Footer of an encoded unit. Reading it never touches column data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMetadata {
  pub num_rows: u64,
  pub num_row_groups: usize,
  pub columns: Vec<ColumnMetadata>,
}

impl UnitMetadata {
  fn from_parquet(metadata: &ParquetMetaData, schema: &SchemaRef) -> Self {
    let columns = schema
      .fields()
      .iter()
      .enumerate()
      .map(|(idx, field)| ColumnMetadata {
        name: field.name().clone(),
        column_type: declared_type(field),
        chunks: metadata
          .row_groups()
          .iter()
          .map(|rg| {
            let (start, len) = rg.column(idx).byte_range();
            start..start + len
          })
          .collect(),
      })
      .collect();
    UnitMetadata {
      num_rows: metadata.file_metadata().num_rows().max(0) as u64,
      num_row_groups: metadata.num_row_groups(),
      columns,
    }
  }

  pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
    self.columns.iter().find(|c| c.name == name)
  }
}

/// Convert the row encoded unit at `src` into a column encoded unit at `dst`.
///
/// Only the columns `schema` declares are kept, in declared order. The whole unit fails with
/// [`Error::SchemaViolation`] on the first value that does not coerce to its declared type; no
/// partial file is left at `dst`. Encoding the same input twice yields byte-identical output.
pub fn encode_unit(
  src: impl AsRef<Path>,
  dst: impl AsRef<Path>,
  schema: &Schema,
  options: &EncodeOptions,
) -> Result<UnitMetadata> {
  let (src, dst) = (src.as_ref(), dst.as_ref());
  let unit = RowUnit::open(src, options.csv)?;

  // A zero-byte unit encodes to a zero-row unit with the declared schema.
  for name in schema.names().filter(|_| !unit.is_empty()) {
    if !unit.header().iter().any(|h| h == name) {
      return Err(Error::SchemaViolation {
        unit: Some(src.to_path_buf()),
        message: format!("declared column {name:?} missing from header"),
      });
    }
  }

  let target = arrow_schema(schema);
  let tmp = staging_path(dst);
  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
  }

  let metadata = match write_unit(&unit, schema, &target, &tmp, options) {
    Ok(metadata) => metadata,
    Err(err) => {
      let _ = fs::remove_file(&tmp);
      return Err(err);
    }
  };
  fs::rename(&tmp, dst).map_err(|e| Error::io(dst, e))?;

  debug!(
    src = %src.display(),
    dst = %dst.display(),
    rows = metadata.num_rows,
    "encoded unit"
  );
  Ok(metadata)
}

fn write_unit(
  unit: &RowUnit,
  schema: &Schema,
  target: &SchemaRef,
  tmp: &Path,
  options: &EncodeOptions,
) -> Result<UnitMetadata> {
  let wanted: Vec<&str> = schema.names().collect();
  let file = File::create(tmp).map_err(|e| Error::io(tmp, e))?;
  let mut writer = ArrowWriter::try_new(file, target.clone(), Some(options.writer_properties()))
    .map_err(|e| Error::storage(tmp, e))?;

  let mut line = 1;
  for batch in unit.project(schema, &wanted)? {
    let batch = batch?;
    validate_batch(&batch, schema, line).map_err(|message| Error::SchemaViolation {
      unit: Some(unit.path().to_path_buf()),
      message,
    })?;
    line += batch.num_rows();

    let batch = RecordBatch::try_new(target.clone(), batch.columns().to_vec())
      .map_err(|e| Error::storage(unit.path(), e))?;
    writer.write(&batch).map_err(|e| Error::storage(tmp, e))?;
  }

  writer.close().map_err(|e| Error::storage(tmp, e))?;
  // Re-read the footer rather than converting the thrift structure by hand.
  let builder = open_builder(tmp)?;
  Ok(UnitMetadata::from_parquet(builder.metadata(), target))
}

/// Enforce declared nullability and timestamp syntax, which the text reader cannot.
/// `first_line` is the 1-based data line of the batch's first row.
fn validate_batch(
  batch: &RecordBatch,
  schema: &Schema,
  first_line: usize,
) -> std::result::Result<(), String> {
  for (field, column) in schema.fields().iter().zip(batch.columns()) {
    if !field.nullable && column.null_count() > 0 {
      let row = (0..column.len()).find(|&i| column.is_null(i)).unwrap_or(0);
      return Err(format!(
        "null value in non-nullable column {:?} at line {}",
        field.name,
        first_line + row
      ));
    }
    if field.column_type == ColumnType::Timestamp {
      for (row, value) in column.as_string::<i32>().iter().enumerate() {
        let Some(value) = value else { continue };
        if !is_timestamp(value) {
          return Err(format!(
            "value {value:?} in column {:?} at line {} is not a timestamp",
            field.name,
            first_line + row
          ));
        }
      }
    }
  }
  Ok(())
}

fn is_timestamp(value: &str) -> bool {
  TIMESTAMP_FORMATS
    .iter()
    .any(|format| NaiveDateTime::parse_from_str(value, format).is_ok())
}

/// Sibling path the encoder writes to before renaming. Its leading `.` keeps it out of dataset
/// discovery.
fn staging_path(dst: &Path) -> PathBuf {
  let name = dst
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  dst.with_file_name(format!(".{name}.tmp"))
}

/// Read the footer of an encoded unit.
pub fn unit_metadata(path: impl AsRef<Path>) -> Result<UnitMetadata> {
  let path = path.as_ref();
  let builder = open_builder(path)?;
  Ok(UnitMetadata::from_parquet(builder.metadata(), builder.schema()))
}

fn open_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
  let file = File::open(path).map_err(|e| Error::io(path, e))?;
  ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| Error::storage(path, e))
}

/// A streaming reader over the wanted columns of an encoded unit.
pub struct ColumnReader {
  path: PathBuf,
  schema: SchemaRef,
  num_rows: u64,
  reader: ParquetRecordBatchReader,
}

impl ColumnReader {
  /// Open `path` projecting only `wanted`. Fails with [`Error::ColumnNotFound`] if a wanted
  /// column is absent from the unit's footer.
  pub fn open(path: impl AsRef<Path>, wanted: &[&str], batch_size: usize) -> Result<ColumnReader> {
    let path = path.as_ref();
    let builder = open_builder(path)?;
    let file_schema = builder.schema().clone();

    let mut indices = Vec::with_capacity(wanted.len());
    for column in wanted {
      let idx = file_schema
        .index_of(column)
        .map_err(|_| Error::column_not_found(*column).in_unit(path))?;
      indices.push(idx);
    }

    let num_rows = builder.metadata().file_metadata().num_rows().max(0) as u64;
    let mask = ProjectionMask::roots(builder.parquet_schema(), indices.clone());
    let reader = builder
      .with_projection(mask)
      .with_batch_size(batch_size.max(1))
      .build()
      .map_err(|e| Error::storage(path, e))?;

    // The projected batches follow file order, not `wanted` order.
    indices.sort_unstable();
    let schema = Arc::new(
      file_schema
        .project(&indices)
        .map_err(|e| Error::storage(path, e))?,
    );

    Ok(ColumnReader {
      path: path.to_path_buf(),
      schema,
      num_rows,
      reader,
    })
  }

  /// Schema of the projected batches.
  pub fn schema(&self) -> &SchemaRef {
    &self.schema
  }

  pub fn num_rows(&self) -> u64 {
    self.num_rows
  }
}

impl Iterator for ColumnReader {
  type Item = Result<RecordBatch>;

  fn next(&mut self) -> Option<Self::Item> {
    let batch = self.reader.next()?;
    Some(batch.map_err(|e| Error::storage(&self.path, e)))
  }
}

/// Fully decoded columns of one unit, in the order they were asked for.
#[derive(Debug, Clone)]
pub struct DecodedColumns {
  pub names: Vec<String>,
  pub columns: Vec<ArrayRef>,
  pub num_rows: usize,
}

impl DecodedColumns {
  pub fn column(&self, name: &str) -> Option<&ArrayRef> {
    let idx = self.names.iter().position(|n| n == name)?;
    self.columns.get(idx)
  }
}

/// Decode the `wanted` columns of an encoded unit into contiguous arrays.
pub fn decode_unit(path: impl AsRef<Path>, wanted: &[&str]) -> Result<DecodedColumns> {
  let path = path.as_ref();
  let reader = ColumnReader::open(path, wanted, crate::rows::DEFAULT_BATCH_SIZE)?;
  let schema = reader.schema().clone();
  let batches = reader.collect::<Result<Vec<_>>>()?;
  let num_rows = batches.iter().map(|b| b.num_rows()).sum();

  let mut columns = Vec::with_capacity(wanted.len());
  for column in wanted {
    let idx = schema
      .index_of(column)
      .map_err(|_| Error::column_not_found(*column).in_unit(path))?;
    let array = if batches.is_empty() {
      arrow::array::new_empty_array(schema.field(idx).data_type())
    } else {
      let parts: Vec<&dyn Array> = batches.iter().map(|b| b.column(idx).as_ref()).collect();
      concat(&parts).map_err(|e| Error::storage(path, e))?
    };
    columns.push(array);
  }

  Ok(DecodedColumns {
    names: wanted.iter().map(|c| c.to_string()).collect(),
    columns,
    num_rows,
  })
}

#[cfg(test)]
mod tests {
  use std::io::{Seek, SeekFrom, Write};

  use arrow::{
    array::{Int32Array, Int64Array, StringArray},
    datatypes::{Int32Type, Int64Type},
  };
  use rstest::rstest;
  use tempfile::TempDir;

  use super::*;

  const CSV: &str = "\
license,pickup,miles,zone,notes
HV0005,2020-03-01 00:01:02,3,11,first
HV0003,2020-03-01T00:05:00,,12,\"a, b\"
HV0005,2020-03-02 10:00:00.250,8,13,
";

  fn schema() -> Schema {
    Schema::parse("license:string!,pickup:timestamp,miles:int64,zone:int32").unwrap()
  }

  fn write_csv(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("unit.csv");
    fs::write(&path, contents).unwrap();
    path
  }

  #[rstest]
  #[case(Compression::None)]
  #[case(Compression::Snappy)]
  #[case(Compression::Zstd)]
  fn test_encode_decode_all_columns(#[case] compression: Compression) {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, CSV);
    let dst = dir.path().join("out/unit.parquet");

    let options = EncodeOptions::default().with_compression(compression);
    let metadata = encode_unit(&src, &dst, &schema(), &options).unwrap();
    assert_eq!(metadata.num_rows, 3);
    assert_eq!(
      metadata.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
      vec!["license", "pickup", "miles", "zone"]
    );
    assert_eq!(
      metadata.column("pickup").unwrap().column_type,
      Some(ColumnType::Timestamp)
    );
    assert_eq!(unit_metadata(&dst).unwrap(), metadata);

    let decoded = decode_unit(&dst, &["zone", "license", "miles", "pickup"]).unwrap();
    assert_eq!(decoded.num_rows, 3);
    assert_eq!(
      decoded.column("license").unwrap().as_string::<i32>(),
      &StringArray::from(vec!["HV0005", "HV0003", "HV0005"])
    );
    assert_eq!(
      decoded.column("miles").unwrap().as_primitive::<Int64Type>(),
      &Int64Array::from(vec![Some(3), None, Some(8)])
    );
    assert_eq!(
      decoded.column("zone").unwrap().as_primitive::<Int32Type>(),
      &Int32Array::from(vec![11, 12, 13])
    );
    assert_eq!(
      decoded.column("pickup").unwrap().as_string::<i32>().value(2),
      "2020-03-02 10:00:00.250"
    );
  }

  #[test]
  fn test_encode_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, CSV);
    let first = dir.path().join("first.parquet");
    let second = dir.path().join("second.parquet");

    encode_unit(&src, &first, &schema(), &EncodeOptions::default()).unwrap();
    encode_unit(&src, &second, &schema(), &EncodeOptions::default()).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
  }

  #[rstest]
  #[case("license,pickup,miles,zone\nHV0005,2020-03-01 00:00:00,x,1\n")]
  #[case("license,pickup,miles,zone\nHV0005,2020-03-01 00:00:00,1,99999999999\n")]
  #[case("license,pickup,miles,zone\nHV0005,yesterday,1,1\n")]
  #[case("license,pickup,miles,zone\n,2020-03-01 00:00:00,1,1\n")]
  #[case("license,pickup,zone\nHV0005,2020-03-01 00:00:00,1\n")]
  fn test_encode_rejects_schema_violation(#[case] contents: &str) {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, contents);
    let dst = dir.path().join("unit.parquet");

    let err = encode_unit(&src, &dst, &schema(), &EncodeOptions::default()).unwrap_err();
    assert!(matches!(err, Error::SchemaViolation { .. }), "{err}");
    assert!(!dst.exists());
    assert!(!staging_path(&dst).exists());
  }

  #[test]
  fn test_decode_missing_column() {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, CSV);
    let dst = dir.path().join("unit.parquet");
    encode_unit(&src, &dst, &schema(), &EncodeOptions::default()).unwrap();

    let err = decode_unit(&dst, &["license", "notes"]).unwrap_err();
    assert!(matches!(err, Error::ColumnNotFound { column, .. } if column == "notes"));
  }

  #[test]
  fn test_decode_skips_corrupted_unselected_column() {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, CSV);
    let dst = dir.path().join("unit.parquet");
    let options = EncodeOptions::default().with_compression(Compression::None);
    let metadata = encode_unit(&src, &dst, &schema(), &options).unwrap();

    // Overwrite every byte of the `miles` column chunk.
    let chunk = metadata.column("miles").unwrap().chunks[0].clone();
    let mut file = fs::OpenOptions::new().write(true).open(&dst).unwrap();
    file.seek(SeekFrom::Start(chunk.start)).unwrap();
    file
      .write_all(&vec![0xff; (chunk.end - chunk.start) as usize])
      .unwrap();
    drop(file);

    let decoded = decode_unit(&dst, &["license", "zone"]).unwrap();
    assert_eq!(decoded.num_rows, 3);
  }

  #[test]
  fn test_encode_header_only_unit() {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, "license,pickup,miles,zone\n");
    let dst = dir.path().join("unit.parquet");
    let metadata = encode_unit(&src, &dst, &schema(), &EncodeOptions::default()).unwrap();
    assert_eq!(metadata.num_rows, 0);

    let decoded = decode_unit(&dst, &["license"]).unwrap();
    assert_eq!(decoded.num_rows, 0);
    assert_eq!(decoded.columns[0].len(), 0);
  }

  #[test]
  fn test_encode_zero_byte_unit() {
    let dir = TempDir::new().unwrap();
    let src = write_csv(&dir, "");
    let dst = dir.path().join("unit.parquet");
    let metadata = encode_unit(&src, &dst, &schema(), &EncodeOptions::default()).unwrap();
    assert_eq!(metadata.num_rows, 0);
    assert!(metadata.column("miles").is_some());

    let decoded = decode_unit(&dst, &["license", "miles"]).unwrap();
    assert_eq!(decoded.num_rows, 0);
  }
}
