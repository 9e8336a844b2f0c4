use std::path::{Path, PathBuf};

use partscan_core::{Dataset, Error, Result, Unit, UnitEncoding};
use tracing::info;

use crate::codec::{encode_unit, EncodeOptions};

/// Destination of a row encoded unit below `out_root`: same relative directories (and so the
/// same `key=value` partition segments), column encoding extension.
pub fn converted_path(dataset: &Dataset, unit: &Unit, out_root: &Path) -> PathBuf {
  let relative = unit
    .path()
    .strip_prefix(dataset.root())
    .unwrap_or_else(|_| Path::new(unit.path().file_name().unwrap_or_default()));
  out_root
    .join(relative)
    .with_extension(UnitEncoding::Column.extension())
}

/// Encode every unit of a row encoded dataset below `out_root`, preserving its partition layout,
/// and return the column encoded dataset.
///
/// Conversion is a separate phase that must complete before any scan of the output starts.
pub fn convert_dataset(
  rows: &Dataset,
  out_root: impl AsRef<Path>,
  options: &EncodeOptions,
) -> Result<Dataset> {
  let out_root = out_root.as_ref();
  if rows.encoding() != UnitEncoding::Row {
    return Err(Error::schema_violation(format!(
      "{} is already column encoded",
      rows.root().display()
    )));
  }

  let physical = rows.physical_schema();
  let mut units = Vec::with_capacity(rows.len());
  let mut total_rows = 0;
  for unit in rows.units() {
    let dst = converted_path(rows, unit, out_root);
    let metadata = encode_unit(unit.path(), &dst, &physical, options)?;
    total_rows += metadata.num_rows;
    units.push(Unit::new(dst, unit.partition().to_vec()));
  }

  info!(
    src = %rows.root().display(),
    dst = %out_root.display(),
    units = units.len(),
    rows = total_rows,
    "converted dataset"
  );
  Dataset::new(out_root, rows.schema(), UnitEncoding::Column, units)
}
