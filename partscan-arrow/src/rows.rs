//! Reading row encoded (delimited text) units.
//!
//! Rows are tokenized in full, but only the projected fields are converted to typed arrays, so
//! a malformed value in an unselected column never surfaces as an error.

use std::{
  fs::File,
  path::{Path, PathBuf},
  sync::Arc,
};

use arrow::{
  csv::{reader::Format, Reader, ReaderBuilder},
  datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema},
  error::ArrowError,
  record_batch::RecordBatch,
};
use partscan_core::{Error, Result, Schema};

use crate::types::arrow_type;

pub const DEFAULT_BATCH_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
  pub delimiter: u8,
  pub batch_size: usize,
}

impl Default for CsvOptions {
  fn default() -> Self {
    CsvOptions {
      delimiter: b',',
      batch_size: DEFAULT_BATCH_SIZE,
    }
  }
}

impl CsvOptions {
  pub fn with_delimiter(mut self, delimiter: u8) -> Self {
    self.delimiter = delimiter;
    self
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  fn format(&self) -> Format {
    Format::default()
      .with_header(true)
      .with_delimiter(self.delimiter)
  }
}

/// A row encoded unit whose header has been read.
#[derive(Debug, Clone)]
pub struct RowUnit {
  path: PathBuf,
  header: Vec<String>,
  options: CsvOptions,
}

impl RowUnit {
  /// Read the header row. A zero-byte file is an empty unit with no columns.
  pub fn open(path: impl AsRef<Path>, options: CsvOptions) -> Result<RowUnit> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();

    let header = if len == 0 {
      Vec::new()
    } else {
      let (schema, _) = options
        .format()
        .infer_schema(&file, Some(0))
        .map_err(|e| csv_error(path, e))?;
      schema.fields().iter().map(|f| f.name().clone()).collect()
    };

    Ok(RowUnit {
      path: path.to_path_buf(),
      header,
      options,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn header(&self) -> &[String] {
    &self.header
  }

  /// A zero-byte unit: no header, no rows.
  pub fn is_empty(&self) -> bool {
    self.header.is_empty()
  }

  /// Stream the `wanted` columns, typed as `schema` declares them.
  ///
  /// With no wanted column the first column is read as plain text, which is enough to count
  /// rows. A zero-byte unit yields no batches whatever is wanted.
  pub fn project(&self, schema: &Schema, wanted: &[&str]) -> Result<ProjectedRows> {
    if self.is_empty() {
      return Ok(ProjectedRows {
        path: self.path.clone(),
        reader: None,
      });
    }

    let mut projection = Vec::with_capacity(wanted.len().max(1));
    for column in wanted {
      let idx = self
        .header
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| Error::column_not_found(*column).in_unit(&self.path))?;
      projection.push(idx);
    }
    if projection.is_empty() {
      projection.push(0);
    }

    // Every field is nullable while reading; declared nullability is enforced by the caller.
    let fields: Vec<ArrowField> = self
      .header
      .iter()
      .enumerate()
      .map(|(idx, name)| {
        let data_type = match schema.field(name) {
          Some(field) if projection.contains(&idx) && !wanted.is_empty() => {
            arrow_type(field.column_type)
          }
          _ => DataType::Utf8,
        };
        ArrowField::new(name, data_type, true)
      })
      .collect();

    let file = File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
    let reader = ReaderBuilder::new(Arc::new(ArrowSchema::new(fields)))
      .with_format(self.options.format())
      .with_batch_size(self.options.batch_size)
      .with_projection(projection)
      .build(file)
      .map_err(|e| csv_error(&self.path, e))?;

    Ok(ProjectedRows {
      path: self.path.clone(),
      reader: Some(reader),
    })
  }
}

/// Record batches holding only the projected columns of a row encoded unit.
pub struct ProjectedRows {
  path: PathBuf,
  reader: Option<Reader<File>>,
}

impl Iterator for ProjectedRows {
  type Item = Result<RecordBatch>;

  fn next(&mut self) -> Option<Self::Item> {
    let batch = self.reader.as_mut()?.next()?;
    Some(batch.map_err(|e| csv_error(&self.path, e)))
  }
}

/// Values that fail to parse as their declared type are schema violations. Anything else is a
/// storage failure.
fn csv_error(path: &Path, err: ArrowError) -> Error {
  match err {
    ArrowError::ParseError(message) => Error::SchemaViolation {
      unit: Some(path.to_path_buf()),
      message,
    },
    other => Error::storage(path, other),
  }
}
