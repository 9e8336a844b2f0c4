//! Projected, predicate-filtered counting over a single unit.
//!
//! A [`UnitScanner`] binds a [`Query`] to a [`Dataset`] once and then counts matches unit by
//! unit. Only the predicate column (plus any explicitly wanted column) is read; each batch is
//! compared and dropped before the next one is decoded, so the working set is bounded by one
//! batch of one column rather than by the unit's full width.

use arrow::{
  array::{ArrayRef, Int32Array, Int64Array, Scalar, StringArray},
  compute::kernels::cmp::eq,
  error::ArrowError,
};
use partscan_core::{
  Dataset, Error, Literal, Query, ResolvedPredicate, ResolvedQuery, Result, Schema, Unit,
  UnitEncoding,
};
use tracing::debug;

use crate::{
  codec::{unit_metadata, ColumnReader},
  rows::{CsvOptions, RowUnit},
  types::arrow_type,
};

/// Count the values of `array` equal to `literal`. Nulls never match.
pub fn count_equal(array: &ArrayRef, literal: &Literal) -> std::result::Result<usize, ArrowError> {
  let mask = match literal {
    Literal::Utf8(value) => eq(array, &Scalar::new(StringArray::from_iter_values([value])))?,
    Literal::Int64(value) => eq(array, &Scalar::new(Int64Array::from(vec![*value])))?,
    Literal::Int32(value) => eq(array, &Scalar::new(Int32Array::from(vec![*value])))?,
  };
  Ok(mask.true_count())
}

/// Where a unit's answer comes from once partition values are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPlan {
  /// The unit's partition values rule every row out; the unit is not opened.
  Pruned,
  /// Every row matches; only the row count is needed.
  CountRows,
  /// The predicate column has to be read and compared.
  Filter,
}

/// A query bound to a dataset, ready to scan its units.
#[derive(Debug, Clone)]
pub struct UnitScanner {
  encoding: UnitEncoding,
  physical_schema: Schema,
  partition_keys: Vec<String>,
  query: ResolvedQuery,
  csv: CsvOptions,
}

impl UnitScanner {
  /// Resolve `query` against the dataset's schema. Fails with [`Error::ColumnNotFound`] before
  /// any unit is touched if a wanted column is not declared.
  pub fn new(dataset: &Dataset, query: &Query, csv: CsvOptions) -> Result<UnitScanner> {
    Ok(UnitScanner {
      encoding: dataset.encoding(),
      physical_schema: dataset.physical_schema(),
      partition_keys: dataset.partition_keys().to_vec(),
      query: query.resolve(dataset.schema())?,
      csv,
    })
  }

  pub fn query(&self) -> &ResolvedQuery {
    &self.query
  }

  pub fn encoding(&self) -> UnitEncoding {
    self.encoding
  }

  /// Predicate on a stored column, if any.
  pub fn physical_predicate(&self) -> Option<&ResolvedPredicate> {
    self
      .query
      .predicate
      .as_ref()
      .filter(|p| !self.partition_keys.contains(&p.column))
  }

  /// Wanted columns that are stored inside each unit.
  pub fn physical_columns(&self) -> Vec<&str> {
    self.query.physical_columns(&self.partition_keys)
  }

  pub fn plan(&self, unit: &Unit) -> UnitPlan {
    match &self.query.predicate {
      Some(p) if self.partition_keys.contains(&p.column) => {
        let value = unit.partition_value(&p.column).unwrap_or_default();
        if p.literal.matches_text(value) {
          UnitPlan::CountRows
        } else {
          UnitPlan::Pruned
        }
      }
      Some(_) => UnitPlan::Filter,
      None => UnitPlan::CountRows,
    }
  }

  /// Count the rows of `unit` satisfying the query.
  pub fn scan(&self, unit: &Unit) -> Result<u64> {
    let plan = self.plan(unit);
    let count = match plan {
      UnitPlan::Pruned => 0,
      UnitPlan::CountRows | UnitPlan::Filter => {
        let scanned = match self.encoding {
          UnitEncoding::Row => self.scan_rows(unit),
          UnitEncoding::Column => self.scan_columns(unit),
        };
        scanned.map_err(|e| e.in_unit(unit.path()))?
      }
    };
    debug!(unit = %unit.path().display(), ?plan, count, "scanned unit");
    Ok(count)
  }

  /// Lazily scan `units`, yielding one count per unit.
  pub fn counts<'a>(&'a self, units: &'a [Unit]) -> impl Iterator<Item = Result<u64>> + 'a {
    units.iter().map(move |unit| self.scan(unit))
  }

  fn scan_rows(&self, unit: &Unit) -> Result<u64> {
    let wanted = self.physical_columns();
    let predicate = self.physical_predicate();
    let rows = RowUnit::open(unit.path(), self.csv)?.project(&self.physical_schema, &wanted)?;

    let mut count = 0u64;
    for batch in rows {
      let batch = batch?;
      count += match predicate {
        Some(p) => {
          let column = batch
            .column_by_name(&p.column)
            .ok_or_else(|| Error::column_not_found(&p.column))?;
          count_equal(column, &p.literal).map_err(|e| Error::storage(unit.path(), e))? as u64
        }
        None => batch.num_rows() as u64,
      };
    }
    Ok(count)
  }

  fn scan_columns(&self, unit: &Unit) -> Result<u64> {
    let wanted = self.physical_columns();
    if wanted.is_empty() {
      // Row count straight from the footer.
      return Ok(unit_metadata(unit.path())?.num_rows);
    }
    let reader = ColumnReader::open(unit.path(), &wanted, self.csv.batch_size)?;

    for field in reader.schema().fields() {
      if let Some(declared) = self.physical_schema.field(field.name()) {
        if field.data_type() != &arrow_type(declared.column_type) {
          return Err(Error::schema_violation(format!(
            "column {:?} is stored as {}, declared {}",
            field.name(),
            field.data_type(),
            declared.column_type
          )));
        }
      }
    }

    let Some(predicate) = self.physical_predicate() else {
      return Ok(reader.num_rows());
    };

    let mut count = 0u64;
    for batch in reader {
      let batch = batch?;
      let column = batch
        .column_by_name(&predicate.column)
        .ok_or_else(|| Error::column_not_found(&predicate.column))?;
      count += count_equal(column, &predicate.literal).map_err(|e| Error::storage(unit.path(), e))?
        as u64;
    }
    Ok(count)
  }
}
