//! The deferred plan experiment builds a lazy query plan over the column encoded dataset and runs
//! it only when a terminal operation is requested. The execution mirrors the physical design of
//! [arrow-datafusion](https://github.com/apache/arrow-datafusion): operators pass
//! `Vec<RecordBatch>` along, so the filter step materializes the matching values rather than a
//! selection vector, and the final count runs over those materialized batches.
//!
//! Building a plan ([`LazyFrame::scan`], [`LazyFrame::select`], [`LazyFrame::filter_eq`]) never
//! touches a unit. Executing it ([`LazyFrame::collect`], [`LazyFrame::count`]) does, per unit:
//! 1. partition pruning on synthetic partition columns
//! 2. zone-map pruning of row groups using the predicate column's min/max statistics
//! 3. column projection, then value-level filtering of each decoded batch

use std::fmt;

use anyhow::Context;
use arrow::{
  array::RecordBatch,
  compute::{filter_record_batch, kernels::cmp::eq},
};
use futures::StreamExt;
use parquet::{
  arrow::{ParquetRecordBatchStreamBuilder, ProjectionMask},
  file::{metadata::ParquetMetaData, statistics::Statistics},
};
use partscan_arrow::{rows::DEFAULT_BATCH_SIZE, scan::UnitPlan, CsvOptions, UnitScanner};
use partscan_core::{Dataset, Error, Literal, Query, ResolvedPredicate, Result, Unit};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::{expect_encoding, ExecutionStrategy, StrategyKind};

/// Logical operators of a deferred plan.
#[derive(Debug, Clone)]
pub enum LogicalPlan {
  Scan { dataset: Dataset },
  Projection {
    input: Box<LogicalPlan>,
    columns: Vec<String>,
  },
  Filter {
    input: Box<LogicalPlan>,
    column: String,
    value: String,
  },
}

impl LogicalPlan {
  /// Collapse the operator tree into the dataset it scans and the query it evaluates, i.e. push
  /// projection and filter down into the scan.
  fn pushdown(&self) -> (&Dataset, Query) {
    match self {
      LogicalPlan::Scan { dataset } => (dataset, Query::count_all()),
      LogicalPlan::Projection { input, columns } => {
        let (dataset, query) = input.pushdown();
        let query = columns.iter().fold(query, |q, c| q.with_column(c.clone()));
        (dataset, query)
      }
      LogicalPlan::Filter {
        input,
        column,
        value,
      } => {
        let (dataset, inner) = input.pushdown();
        let mut query = Query::count_where(column.clone(), value.clone());
        for c in inner.wanted_columns() {
          query = query.with_column(c);
        }
        (dataset, query)
      }
    }
  }
}

impl fmt::Display for LogicalPlan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LogicalPlan::Scan { dataset } => write!(
        f,
        "Scan: {} ({} units)",
        dataset.root().display(),
        dataset.len()
      ),
      LogicalPlan::Projection { input, columns } => {
        write!(f, "Projection: {}\n  {input}", columns.join(", "))
      }
      LogicalPlan::Filter {
        input,
        column,
        value,
      } => write!(f, "Filter: {column} = {value:?}\n  {input}"),
    }
  }
}

/// A lazily evaluated query over a column encoded dataset.
#[derive(Debug, Clone)]
pub struct LazyFrame {
  plan: LogicalPlan,
  batch_size: usize,
}

impl LazyFrame {
  /// Start a plan over `dataset`. Only the handle is captured; no unit is opened.
  pub fn scan(dataset: &Dataset) -> LazyFrame {
    LazyFrame {
      plan: LogicalPlan::Scan {
        dataset: dataset.clone(),
      },
      batch_size: DEFAULT_BATCH_SIZE,
    }
  }

  pub fn select<I, S>(self, columns: I) -> LazyFrame
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    LazyFrame {
      plan: LogicalPlan::Projection {
        input: Box::new(self.plan),
        columns: columns.into_iter().map(Into::into).collect(),
      },
      batch_size: self.batch_size,
    }
  }

  pub fn filter_eq(self, column: impl Into<String>, value: impl Into<String>) -> LazyFrame {
    LazyFrame {
      plan: LogicalPlan::Filter {
        input: Box::new(self.plan),
        column: column.into(),
        value: value.into(),
      },
      batch_size: self.batch_size,
    }
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> LazyFrame {
    self.batch_size = batch_size.max(1);
    self
  }

  pub fn plan(&self) -> &LogicalPlan {
    &self.plan
  }

  /// Execute the plan and return the projected, filtered batches of every unit.
  pub async fn collect(&self) -> Result<Vec<RecordBatch>> {
    let (dataset, query) = self.plan.pushdown();
    expect_encoding(dataset, StrategyKind::DeferredPlan)?;
    let csv = CsvOptions::default().with_batch_size(self.batch_size);
    let scanner = UnitScanner::new(dataset, &query, csv)?;

    let mut result = vec![];
    for unit in dataset.units() {
      let batches = execute_unit(&scanner, unit, self.batch_size)
        .await
        .map_err(|e| e.in_unit(unit.path()))?;
      result.extend(batches);
    }
    Ok(result)
  }

  /// Execute the plan and count the surviving rows.
  ///
  /// The count cannot be pushed below the filter: it runs over the materialized batches.
  pub async fn count(&self) -> Result<u64> {
    let batches = self.collect().await?;
    Ok(batches.iter().map(|b| b.num_rows() as u64).sum())
  }
}

async fn execute_unit(
  scanner: &UnitScanner,
  unit: &Unit,
  batch_size: usize,
) -> Result<Vec<RecordBatch>> {
  if scanner.plan(unit) == UnitPlan::Pruned {
    debug!(unit = %unit.path().display(), "pruned by partition");
    return Ok(vec![]);
  }

  let file = tokio::fs::File::open(unit.path())
    .await
    .map_err(|e| Error::io(unit.path(), e))?;
  let stream_builder = ParquetRecordBatchStreamBuilder::new(file)
    .await
    .map_err(|e| Error::storage(unit.path(), e))?;

  let file_schema = stream_builder.schema().clone();
  let mut indices = Vec::new();
  for column in scanner.physical_columns() {
    let idx = file_schema
      .index_of(column)
      .map_err(|_| Error::column_not_found(column))?;
    indices.push(idx);
  }
  if indices.is_empty() && !file_schema.fields().is_empty() {
    // Carry row counts through a single column when only partition columns are involved.
    indices.push(0);
  }

  let predicate = scanner.physical_predicate();

  // Step 1: Perform zone-map pruning on row groups
  let row_groups = match predicate {
    Some(predicate) => {
      let idx = file_schema
        .index_of(&predicate.column)
        .map_err(|_| Error::column_not_found(&predicate.column))?;
      prune_row_groups(stream_builder.metadata(), idx, predicate)
    }
    None => (0..stream_builder.metadata().num_row_groups()).collect(),
  };
  debug!(
    unit = %unit.path().display(),
    kept = row_groups.len(),
    total = stream_builder.metadata().num_row_groups(),
    "zone-map pruning"
  );

  let mask = ProjectionMask::roots(stream_builder.parquet_schema(), indices);
  let mut stream = stream_builder
    .with_row_groups(row_groups)
    .with_projection(mask)
    .with_batch_size(batch_size)
    .build()
    .map_err(|e| Error::storage(unit.path(), e))?;

  let mut result = vec![];

  // Step 2: Perform value level filtering
  while let Some(next_batch) = stream.next().await {
    let next_batch = next_batch.map_err(|e| Error::storage(unit.path(), e))?;
    let filtered = match predicate {
      Some(predicate) => filter_batch(&next_batch, predicate)
        .with_context(|| format!("filtering {}", predicate.column))
        .map_err(|e| Error::schema_violation(format!("{e:#}")))?,
      None => next_batch,
    };
    if filtered.num_rows() > 0 {
      result.push(filtered);
    }
  }

  Ok(result)
}

fn filter_batch(batch: &RecordBatch, predicate: &ResolvedPredicate) -> anyhow::Result<RecordBatch> {
  let column = batch
    .column_by_name(&predicate.column)
    .context("predicate column missing from projected batch")?;
  let mask = match &predicate.literal {
    Literal::Utf8(value) => eq(
      column,
      &arrow::array::Scalar::new(arrow::array::StringArray::from_iter_values([value])),
    )?,
    Literal::Int64(value) => eq(
      column,
      &arrow::array::Scalar::new(arrow::array::Int64Array::from(vec![*value])),
    )?,
    Literal::Int32(value) => eq(
      column,
      &arrow::array::Scalar::new(arrow::array::Int32Array::from(vec![*value])),
    )?,
  };
  Ok(filter_record_batch(batch, &mask)?)
}

/// Keep the row groups whose statistics for column `idx` do not rule the literal out.
/// Row groups without usable statistics are always kept.
fn prune_row_groups(
  metadata: &ParquetMetaData,
  idx: usize,
  predicate: &ResolvedPredicate,
) -> Vec<usize> {
  let mut row_groups = Vec::with_capacity(metadata.num_row_groups());
  for (rg_idx, rowgroup_metadata) in metadata.row_groups().iter().enumerate() {
    let column_metadata = rowgroup_metadata.column(idx);
    if let Some(statistics) = column_metadata.statistics() {
      if statistics.has_min_max_set() && outside_range(statistics, &predicate.literal) {
        continue;
      }
    }
    row_groups.push(rg_idx);
  }
  row_groups
}

fn outside_range(statistics: &Statistics, literal: &Literal) -> bool {
  match (statistics, literal) {
    (Statistics::ByteArray(s), Literal::Utf8(value)) => {
      let value = value.as_bytes();
      value < s.min().data() || value > s.max().data()
    }
    (Statistics::Int64(s), Literal::Int64(value)) => value < s.min() || value > s.max(),
    (Statistics::Int32(s), Literal::Int32(value)) => value < s.min() || value > s.max(),
    _ => false,
  }
}

/// Runs [`LazyFrame::count`] on its own tokio runtime.
pub struct DeferredPlanStrategy {
  runtime: Runtime,
  batch_size: usize,
}

impl DeferredPlanStrategy {
  pub fn new(batch_size: usize) -> std::io::Result<Self> {
    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()?;
    Ok(DeferredPlanStrategy {
      runtime,
      batch_size,
    })
  }

  /// Express a [`Query`] as a deferred plan.
  pub fn plan(&self, dataset: &Dataset, query: &Query) -> LazyFrame {
    let mut frame = LazyFrame::scan(dataset).with_batch_size(self.batch_size);
    let predicate_column = query.predicate().map(|p| p.column.as_str());
    let extra: Vec<&str> = query
      .wanted_columns()
      .into_iter()
      .filter(|c| Some(*c) != predicate_column)
      .collect();
    if !extra.is_empty() {
      frame = frame.select(extra);
    }
    if let Some(predicate) = query.predicate() {
      frame = frame.filter_eq(predicate.column.clone(), predicate.value.clone());
    }
    frame
  }
}

impl ExecutionStrategy for DeferredPlanStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::DeferredPlan
  }

  fn count(&self, dataset: &Dataset, query: &Query) -> Result<u64> {
    expect_encoding(dataset, self.kind())?;
    let frame = self.plan(dataset, query);
    debug!(plan = %frame.plan(), "executing deferred plan");
    self.runtime.block_on(frame.count())
  }
}
