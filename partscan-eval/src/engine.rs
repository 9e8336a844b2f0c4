//! Embedded query engine over the column encoded dataset.
//!
//! The units of the dataset are read by DataFusion as one unioned table, their hive partition
//! values becoming constant columns, and the count is issued declaratively. How the engine
//! parallelizes and streams the scan is its own business; it never needs the whole dataset
//! resident at once.

use datafusion::{
  common::Column,
  error::DataFusionError,
  logical_expr::{lit, Expr},
  prelude::{DataFrame, ParquetReadOptions, SessionConfig, SessionContext},
};
use partscan_arrow::{rows::DEFAULT_BATCH_SIZE, types::arrow_schema, unit_metadata};
use partscan_core::{Dataset, Error, Literal, Query, Result};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::{expect_encoding, ExecutionStrategy, StrategyKind};

fn engine_error(err: DataFusionError) -> Error {
  Error::Engine(err.to_string())
}

fn literal_expr(literal: &Literal) -> Expr {
  match literal {
    Literal::Utf8(value) => lit(value.as_str()),
    Literal::Int64(value) => lit(*value),
    Literal::Int32(value) => lit(*value),
  }
}

pub struct EngineStrategy {
  runtime: Runtime,
  target_partitions: usize,
  batch_size: usize,
}

impl EngineStrategy {
  /// `target_partitions` bounds the engine's internal parallelism.
  pub fn new(target_partitions: usize) -> std::io::Result<Self> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(target_partitions.max(1))
      .enable_all()
      .build()?;
    Ok(EngineStrategy {
      runtime,
      target_partitions: target_partitions.max(1),
      batch_size: DEFAULT_BATCH_SIZE,
    })
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  /// Read `dataset` in a fresh session and count the matching rows.
  pub async fn count_async(&self, dataset: &Dataset, query: &Query) -> Result<u64> {
    let resolved = query.resolve(dataset.schema())?;
    if dataset.is_empty() {
      return Ok(0);
    }
    self.check_units(dataset, query)?;

    let config = SessionConfig::new()
      .with_target_partitions(self.target_partitions)
      .with_batch_size(self.batch_size);
    let ctx = SessionContext::new_with_config(config);

    let mut frame = self.union_units(&ctx, dataset).await?;
    if let Some(predicate) = &resolved.predicate {
      let column = Expr::Column(Column::new_unqualified(predicate.column.clone()));
      frame = frame
        .filter(column.eq(literal_expr(&predicate.literal)))
        .map_err(engine_error)?;
    }
    let count = frame.count().await.map_err(engine_error)?;
    Ok(count as u64)
  }

  /// One table over exactly the units of `dataset`. A listing over the root would also pick up
  /// files the handle leaves out, so each unit is read on its own and its partition values are
  /// attached as constant columns.
  async fn union_units(&self, ctx: &SessionContext, dataset: &Dataset) -> Result<DataFrame> {
    let file_schema = arrow_schema(&dataset.physical_schema());
    let mut table: Option<DataFrame> = None;
    for unit in dataset.units() {
      let path = unit.path().to_string_lossy();
      let options = ParquetReadOptions::default().schema(file_schema.as_ref());
      let mut frame = ctx
        .read_parquet(&*path, options)
        .await
        .map_err(engine_error)?;
      for key in dataset.partition_keys() {
        let value = dataset.partition_value(unit, key).unwrap_or_default();
        frame = frame.with_column(key, lit(value)).map_err(engine_error)?;
      }
      table = Some(match table {
        Some(table) => table.union(frame).map_err(engine_error)?,
        None => frame,
      });
    }
    table.ok_or_else(|| Error::Engine("no units to register".to_string()))
  }

  /// The engine fills columns missing from a file with nulls. A wanted column absent from a
  /// unit is a caller error here, so check every footer first.
  fn check_units(&self, dataset: &Dataset, query: &Query) -> Result<()> {
    let wanted: Vec<&str> = query
      .wanted_columns()
      .into_iter()
      .filter(|c| !dataset.is_partition_column(c))
      .collect();
    if wanted.is_empty() {
      return Ok(());
    }
    for unit in dataset.units() {
      let metadata = unit_metadata(unit.path())?;
      for column in &wanted {
        if metadata.column(column).is_none() {
          return Err(Error::column_not_found(*column).in_unit(unit.path()));
        }
      }
    }
    Ok(())
  }
}

impl ExecutionStrategy for EngineStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::Engine
  }

  fn count(&self, dataset: &Dataset, query: &Query) -> Result<u64> {
    expect_encoding(dataset, self.kind())?;
    debug!(
      root = %dataset.root().display(),
      target_partitions = self.target_partitions,
      "running engine query"
    );
    self.runtime.block_on(self.count_async(dataset, query))
  }
}
