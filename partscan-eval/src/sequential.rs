use partscan_arrow::{CsvOptions, UnitScanner};
use partscan_core::{Dataset, Query, Result};
use tracing::debug;

use crate::{expect_encoding, ExecutionStrategy, StrategyKind};

/// Baseline: scan every row encoded unit in dataset order on the calling thread, parsing only the
/// predicate column of each row.
#[derive(Debug, Clone, Default)]
pub struct SequentialRowStrategy {
  csv: CsvOptions,
}

impl SequentialRowStrategy {
  pub fn new(csv: CsvOptions) -> Self {
    SequentialRowStrategy { csv }
  }
}

impl ExecutionStrategy for SequentialRowStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::SequentialRow
  }

  fn count(&self, dataset: &Dataset, query: &Query) -> Result<u64> {
    expect_encoding(dataset, self.kind())?;
    let scanner = UnitScanner::new(dataset, query, self.csv)?;

    let mut total = 0;
    for count in scanner.counts(dataset.units()) {
      total += count?;
    }
    debug!(units = dataset.len(), total, "sequential scan finished");
    Ok(total)
  }
}
