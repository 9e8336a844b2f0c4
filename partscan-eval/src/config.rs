use std::{num::NonZeroUsize, thread};

use anyhow::{Context, Result};
use partscan_arrow::{rows::DEFAULT_BATCH_SIZE, CsvOptions};

use crate::{
  BenchmarkHarness, DeferredPlanStrategy, EngineStrategy, ExecutionStrategy,
  ParallelRowStrategy, SequentialRowStrategy, StrategyKind,
};

/// Configuration of a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
  /// Size of the parallel worker pool, and the engine's target parallelism.
  pub workers: usize,
  pub batch_size: usize,
  pub warmup: usize,
  pub iterations: usize,
  pub strategies: Vec<StrategyKind>,
  pub delimiter: u8,
}

pub fn available_parallelism() -> usize {
  thread::available_parallelism()
    .map(NonZeroUsize::get)
    .unwrap_or(1)
}

impl Default for BenchConfig {
  fn default() -> Self {
    BenchConfig {
      workers: available_parallelism(),
      batch_size: DEFAULT_BATCH_SIZE,
      warmup: 0,
      iterations: 1,
      strategies: StrategyKind::ALL.to_vec(),
      delimiter: b',',
    }
  }
}

impl BenchConfig {
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }

  pub fn with_iterations(mut self, iterations: usize) -> Self {
    self.iterations = iterations.max(1);
    self
  }

  pub fn with_strategies(mut self, strategies: Vec<StrategyKind>) -> Self {
    self.strategies = strategies;
    self
  }

  pub fn with_delimiter(mut self, delimiter: u8) -> Self {
    self.delimiter = delimiter;
    self
  }

  pub fn csv_options(&self) -> CsvOptions {
    CsvOptions::default()
      .with_delimiter(self.delimiter)
      .with_batch_size(self.batch_size)
  }

  pub fn build_strategy(&self, kind: StrategyKind) -> Result<Box<dyn ExecutionStrategy>> {
    let strategy: Box<dyn ExecutionStrategy> = match kind {
      StrategyKind::SequentialRow => Box::new(SequentialRowStrategy::new(self.csv_options())),
      StrategyKind::ParallelRow => Box::new(
        ParallelRowStrategy::new(self.workers, self.csv_options())
          .context("building worker pool")?,
      ),
      StrategyKind::DeferredPlan => Box::new(
        DeferredPlanStrategy::new(self.batch_size).context("building deferred plan runtime")?,
      ),
      StrategyKind::Engine => Box::new(
        EngineStrategy::new(self.workers)
          .context("building engine runtime")?
          .with_batch_size(self.batch_size),
      ),
    };
    Ok(strategy)
  }

  /// A harness running the configured strategies in order.
  pub fn build_harness(&self) -> Result<BenchmarkHarness> {
    let mut harness = BenchmarkHarness::new()
      .with_warmup(self.warmup)
      .with_iterations(self.iterations);
    for kind in &self.strategies {
      harness = harness.with_strategy(self.build_strategy(*kind)?);
    }
    Ok(harness)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = BenchConfig::default();
    assert!(config.workers >= 1);
    assert_eq!(config.iterations, 1);
    assert_eq!(config.strategies, StrategyKind::ALL.to_vec());
  }

  #[test]
  fn test_build_harness_in_configured_order() {
    let config = BenchConfig::default()
      .with_workers(2)
      .with_iterations(0)
      .with_strategies(vec![StrategyKind::Engine, StrategyKind::SequentialRow]);
    assert_eq!(config.iterations, 1);

    let harness = config.build_harness().unwrap();
    let kinds: Vec<_> = harness.strategies().map(|s| s.kind()).collect();
    assert_eq!(kinds, vec![StrategyKind::Engine, StrategyKind::SequentialRow]);
  }
}
