//! Partition-aware dataset discovery.
//!
//! Opening a dataset walks the directory tree under its root and records one [`Unit`] per data
//! file. Hive-style `key=value` directory names become synthetic partition columns. Unit contents
//! are never read here: the cost of opening is proportional to the number of paths, not to the
//! size of the data.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::{
  schema::{ColumnType, Field, Schema},
  Error, Result,
};

pub const ROW_EXTENSION: &str = "csv";
pub const COLUMN_EXTENSION: &str = "parquet";

/// How the rows of a unit are physically laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitEncoding {
  /// Delimited text with a header row.
  Row,
  /// Column-oriented binary (parquet).
  Column,
}

impl UnitEncoding {
  pub fn from_path(path: &Path) -> Option<UnitEncoding> {
    match path.extension()?.to_str()? {
      ROW_EXTENSION => Some(UnitEncoding::Row),
      COLUMN_EXTENSION => Some(UnitEncoding::Column),
      _ => None,
    }
  }

  pub fn extension(self) -> &'static str {
    match self {
      UnitEncoding::Row => ROW_EXTENSION,
      UnitEncoding::Column => COLUMN_EXTENSION,
    }
  }
}

/// One physical file holding a batch of rows, plus the partition values implied by its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
  path: PathBuf,
  partition: Vec<(String, String)>,
}

impl Unit {
  pub fn new(path: impl Into<PathBuf>, partition: Vec<(String, String)>) -> Self {
    Unit {
      path: path.into(),
      partition,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn partition(&self) -> &[(String, String)] {
    &self.partition
  }

  pub fn partition_value(&self, key: &str) -> Option<&str> {
    self
      .partition
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }
}

/// Parse a `key=value` path segment.
pub fn parse_partition_segment(segment: &str) -> Option<(String, String)> {
  let (key, value) = segment.split_once('=')?;
  if key.is_empty() {
    return None;
  }
  Some((key.to_string(), value.to_string()))
}

/// The result of walking a dataset root, before any schema is applied.
#[derive(Debug, Clone)]
pub struct Layout {
  pub root: PathBuf,
  pub encoding: UnitEncoding,
  pub partition_keys: Vec<String>,
  pub units: Vec<Unit>,
}

/// Discover the data units under `root`, in sorted path order.
///
/// Files whose name starts with `.` or `_` are skipped, as are files of unknown extension.
/// Fails with [`Error::NotFound`] when `root` does not exist or holds no units, and with
/// [`Error::SchemaViolation`] when units disagree on encoding or on partition keys.
pub fn locate(root: impl AsRef<Path>) -> Result<Layout> {
  let root = root.as_ref();
  if !root.exists() {
    return Err(Error::NotFound {
      root: root.to_path_buf(),
    });
  }

  let mut encoding = None;
  let mut partition_keys: Option<Vec<String>> = None;
  let mut units = Vec::new();

  let walker = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
  for entry in walker {
    let entry = entry.map_err(|err| Error::io(root, err.into()))?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Some(unit_encoding) = UnitEncoding::from_path(entry.path()) else {
      continue;
    };

    match encoding {
      None => encoding = Some(unit_encoding),
      Some(existing) if existing != unit_encoding => {
        return Err(Error::SchemaViolation {
          unit: Some(entry.path().to_path_buf()),
          message: format!("dataset mixes {existing:?} and {unit_encoding:?} encoded units"),
        });
      }
      Some(_) => {}
    }

    let partition = partition_of(root, entry.path());
    let keys: Vec<String> = partition.iter().map(|(k, _)| k.clone()).collect();
    match &partition_keys {
      None => partition_keys = Some(keys),
      Some(expected) if *expected != keys => {
        return Err(Error::SchemaViolation {
          unit: Some(entry.path().to_path_buf()),
          message: format!("partition keys {keys:?} differ from {expected:?}"),
        });
      }
      Some(_) => {}
    }

    debug!(unit = %entry.path().display(), ?partition, "located unit");
    units.push(Unit::new(entry.path(), partition));
  }

  match encoding {
    Some(encoding) => Ok(Layout {
      root: root.to_path_buf(),
      encoding,
      partition_keys: partition_keys.unwrap_or_default(),
      units,
    }),
    None => Err(Error::NotFound {
      root: root.to_path_buf(),
    }),
  }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
  name
    .to_str()
    .is_some_and(|n| n.starts_with('.') || n.starts_with('_'))
}

/// Partition values from the directory segments between `root` and the file.
fn partition_of(root: &Path, path: &Path) -> Vec<(String, String)> {
  let relative = path.strip_prefix(root).unwrap_or(path);
  let Some(parent) = relative.parent() else {
    return Vec::new();
  };
  parent
    .components()
    .filter_map(|c| c.as_os_str().to_str())
    .filter_map(parse_partition_segment)
    .collect()
}

/// A handle on a partitioned dataset: its logical schema and the units it is made of.
///
/// The logical schema holds the physically stored columns followed by one synthetic [`ColumnType::Utf8`]
/// column per partition key.
#[derive(Debug, Clone)]
pub struct Dataset {
  root: PathBuf,
  schema: Schema,
  encoding: UnitEncoding,
  partition_keys: Vec<String>,
  units: Vec<Unit>,
}

impl Dataset {
  /// Locate the units under `root` and bind them to `schema`.
  pub fn open(root: impl AsRef<Path>, schema: &Schema) -> Result<Dataset> {
    let layout = locate(root)?;
    let dataset = Dataset::from_layout(layout, schema)?;
    debug!(
      root = %dataset.root.display(),
      units = dataset.units.len(),
      partitions = ?dataset.partition_keys,
      "opened dataset"
    );
    Ok(dataset)
  }

  /// Build a handle from units gathered elsewhere. Partition keys are taken from the first unit;
  /// a dataset without units is legal and counts zero.
  pub fn new(
    root: impl Into<PathBuf>,
    schema: &Schema,
    encoding: UnitEncoding,
    units: Vec<Unit>,
  ) -> Result<Dataset> {
    let partition_keys = units
      .first()
      .map(|u| u.partition.iter().map(|(k, _)| k.clone()).collect())
      .unwrap_or_default();
    Dataset::from_layout(
      Layout {
        root: root.into(),
        encoding,
        partition_keys,
        units,
      },
      schema,
    )
  }

  fn from_layout(layout: Layout, schema: &Schema) -> Result<Dataset> {
    let mut schema = schema.clone();
    for key in &layout.partition_keys {
      match schema.field(key) {
        Some(field) if field.column_type != ColumnType::Utf8 => {
          return Err(Error::schema_violation(format!(
            "partition column {key:?} must be declared utf8, found {}",
            field.column_type
          )));
        }
        Some(_) => {}
        None => schema.push(Field::new(key.clone(), ColumnType::Utf8, true)),
      }
    }

    for unit in &layout.units {
      let keys = unit.partition.iter().map(|(k, _)| k);
      if !keys.eq(layout.partition_keys.iter()) {
        return Err(Error::SchemaViolation {
          unit: Some(unit.path.clone()),
          message: format!("unit is not partitioned by {:?}", layout.partition_keys),
        });
      }
    }

    Ok(Dataset {
      root: layout.root,
      schema,
      encoding: layout.encoding,
      partition_keys: layout.partition_keys,
      units: layout.units,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Logical schema, partition columns included.
  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// Columns stored inside each unit.
  pub fn physical_schema(&self) -> Schema {
    self
      .schema
      .without(self.partition_keys.iter().map(String::as_str))
  }

  pub fn encoding(&self) -> UnitEncoding {
    self.encoding
  }

  pub fn partition_keys(&self) -> &[String] {
    &self.partition_keys
  }

  pub fn is_partition_column(&self, column: &str) -> bool {
    self.partition_keys.iter().any(|k| k == column)
  }

  /// The synthetic value `unit` carries for partition column `column`. `None` when `column`
  /// is not a partition column of this dataset.
  pub fn partition_value<'u>(&self, unit: &'u Unit, column: &str) -> Option<&'u str> {
    if !self.is_partition_column(column) {
      return None;
    }
    Some(unit.partition_value(column).unwrap_or_default())
  }

  pub fn units(&self) -> &[Unit] {
    &self.units
  }

  pub fn len(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use rstest::rstest;
  use tempfile::TempDir;

  use super::*;

  fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
  }

  #[rstest]
  #[case("year=2020", Some(("year", "2020")))]
  #[case("month=", Some(("month", "")))]
  #[case("a=b=c", Some(("a", "b=c")))]
  #[case("=2020", None)]
  #[case("raw", None)]
  fn test_parse_partition_segment(#[case] segment: &str, #[case] expected: Option<(&str, &str)>) {
    let expected = expected.map(|(k, v)| (k.to_string(), v.to_string()));
    assert_eq!(parse_partition_segment(segment), expected);
  }

  #[test]
  fn test_locate_hive_layout() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "year=2020/month=3/data.parquet");
    touch(dir.path(), "year=2020/month=4/data.parquet");
    touch(dir.path(), "year=2021/month=1/data.parquet");
    touch(dir.path(), "year=2021/month=1/_SUCCESS");
    touch(dir.path(), "year=2021/month=1/.data.parquet.tmp");
    touch(dir.path(), "README.md");

    let layout = locate(dir.path()).unwrap();
    assert_eq!(layout.encoding, UnitEncoding::Column);
    assert_eq!(layout.partition_keys, vec!["year", "month"]);
    assert_eq!(layout.units.len(), 3);
    assert_eq!(layout.units[0].partition_value("month"), Some("3"));
    assert_eq!(layout.units[2].partition_value("year"), Some("2021"));
  }

  #[test]
  fn test_dataset_partition_value() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "year=2020/month=3/data.parquet");
    let schema = Schema::parse("license:string").unwrap();
    let dataset = Dataset::open(dir.path(), &schema).unwrap();
    let unit = &dataset.units()[0];

    assert_eq!(dataset.partition_value(unit, "year"), Some("2020"));
    assert_eq!(dataset.partition_value(unit, "month"), Some("3"));
    assert_eq!(dataset.partition_value(unit, "license"), None);
  }

  #[test]
  fn test_locate_flat_layout() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "b.csv");
    touch(dir.path(), "a.csv");

    let layout = locate(dir.path()).unwrap();
    assert_eq!(layout.encoding, UnitEncoding::Row);
    assert!(layout.partition_keys.is_empty());
    let names: Vec<_> = layout
      .units
      .iter()
      .map(|u| u.path().file_name().unwrap().to_str().unwrap().to_string())
      .collect();
    assert_eq!(names, vec!["a.csv", "b.csv"]);
  }

  #[test]
  fn test_locate_not_found() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(locate(dir.path()), Err(Error::NotFound { .. })));
    assert!(matches!(
      locate(dir.path().join("missing")),
      Err(Error::NotFound { .. })
    ));
    touch(dir.path(), "notes.txt");
    assert!(matches!(locate(dir.path()), Err(Error::NotFound { .. })));
  }

  #[test]
  fn test_locate_rejects_mixed_encodings() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "a.csv");
    touch(dir.path(), "b.parquet");
    assert!(matches!(
      locate(dir.path()),
      Err(Error::SchemaViolation { .. })
    ));
  }

  #[test]
  fn test_locate_rejects_inconsistent_partitions() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "year=2020/a.csv");
    touch(dir.path(), "year=2020/month=1/b.csv");
    assert!(matches!(
      locate(dir.path()),
      Err(Error::SchemaViolation { .. })
    ));
  }

  #[test]
  fn test_open_adds_partition_columns() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "year=2020/month=3/data.csv");

    let schema = Schema::parse("year:string,license:string").unwrap();
    let dataset = Dataset::open(dir.path(), &schema).unwrap();
    assert_eq!(
      dataset.schema().names().collect::<Vec<_>>(),
      vec!["year", "license", "month"]
    );
    assert_eq!(
      dataset.physical_schema().names().collect::<Vec<_>>(),
      vec!["license"]
    );
    assert!(dataset.is_partition_column("month"));
    assert!(!dataset.is_partition_column("license"));
  }

  #[test]
  fn test_open_rejects_non_utf8_partition_column() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "year=2020/data.csv");
    let schema = Schema::parse("year:int32,license:string").unwrap();
    assert!(matches!(
      Dataset::open(dir.path(), &schema),
      Err(Error::SchemaViolation { .. })
    ));
  }

  #[test]
  fn test_new_empty_dataset() {
    let schema = Schema::parse("license:string").unwrap();
    let dataset = Dataset::new("/nowhere", &schema, UnitEncoding::Column, vec![]).unwrap();
    assert!(dataset.is_empty());
    assert!(dataset.partition_keys().is_empty());
  }
}
