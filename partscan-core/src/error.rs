use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while locating, converting or scanning a dataset.
///
/// Every variant that can be traced back to a single data unit carries that unit's path, so a
/// failed benchmark run can be diagnosed without re-running it.
#[derive(Debug, Error)]
pub enum Error {
  /// The root directory does not exist or holds no data units.
  #[error("no data units found under {root:?}")]
  NotFound { root: PathBuf },

  /// A value, a literal or a layout does not conform to the declared schema.
  #[error("schema violation{}: {message}", at(.unit))]
  SchemaViolation {
    unit: Option<PathBuf>,
    message: String,
  },

  /// A wanted or predicate column is absent from the schema or from a unit's metadata.
  #[error("column {column:?} not found{}", at(.unit))]
  ColumnNotFound {
    column: String,
    unit: Option<PathBuf>,
  },

  #[error("i/o error on {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The columnar storage engine (arrow/parquet) failed on a unit.
  #[error("storage error on {unit:?}: {source}")]
  Storage {
    unit: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// The embedded query engine failed.
  #[error("query engine error: {0}")]
  Engine(String),

  /// Repeated runs of the same query over the same dataset returned different counts.
  #[error("count changed between iterations: {previous} then {current}")]
  UnstableCount { previous: u64, current: u64 },

  /// A parallel run was cancelled before every unit was dispatched.
  #[error("scan cancelled after {completed} of {total} units")]
  Cancelled { completed: usize, total: usize },
}

fn at(unit: &Option<PathBuf>) -> String {
  match unit {
    Some(path) => format!(" in {}", path.display()),
    None => String::new(),
  }
}

impl Error {
  pub fn schema_violation(message: impl Into<String>) -> Self {
    Error::SchemaViolation {
      unit: None,
      message: message.into(),
    }
  }

  pub fn column_not_found(column: impl Into<String>) -> Self {
    Error::ColumnNotFound {
      column: column.into(),
      unit: None,
    }
  }

  pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
    Error::Io {
      path: path.as_ref().to_path_buf(),
      source,
    }
  }

  pub fn storage<E>(unit: impl AsRef<Path>, source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Error::Storage {
      unit: unit.as_ref().to_path_buf(),
      source: Box::new(source),
    }
  }

  /// Attach the unit identity to an error raised without one.
  pub fn in_unit(self, path: impl AsRef<Path>) -> Self {
    let path = path.as_ref().to_path_buf();
    match self {
      Error::SchemaViolation { unit: None, message } => Error::SchemaViolation {
        unit: Some(path),
        message,
      },
      Error::ColumnNotFound { column, unit: None } => Error::ColumnNotFound {
        column,
        unit: Some(path),
      },
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_in_unit_fills_missing_context() {
    let err = Error::column_not_found("license").in_unit("/data/a.parquet");
    assert_eq!(
      err.to_string(),
      "column \"license\" not found in /data/a.parquet"
    );
  }

  #[test]
  fn test_in_unit_keeps_existing_context() {
    let err = Error::SchemaViolation {
      unit: Some(PathBuf::from("/data/a.csv")),
      message: "bad value".to_string(),
    }
    .in_unit("/data/b.csv");
    assert_eq!(err.to_string(), "schema violation in /data/a.csv: bad value");
  }
}
