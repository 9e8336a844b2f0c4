//! Fan-out/fan-in over a fixed-size worker pool.
//!
//! Each task's only input is a unit (or a static chunk of units) plus the bound query, and its
//! only output is a partial count. Partial counts are combined with a commutative sum, so no
//! worker shares mutable state with another and the total does not depend on how units were
//! assigned.

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use partscan_arrow::{CsvOptions, UnitScanner};
use partscan_core::{Dataset, Error, Query, Result, Unit};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::debug;

use crate::{expect_encoding, ExecutionStrategy, StrategyKind};

/// Shared flag stopping a parallel run from dispatching further units.
///
/// The flag stays set once cancelled: every later run of a strategy holding it fails with
/// [`Error::Cancelled`] until [`CancelFlag::reset`] is called.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    CancelFlag::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn reset(&self) {
    self.0.store(false, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub struct ParallelRowStrategy {
  pool: ThreadPool,
  workers: usize,
  chunk_size: Option<usize>,
  csv: CsvOptions,
  cancel: CancelFlag,
}

impl ParallelRowStrategy {
  /// A strategy with its own pool of `workers` threads. Units are handed out one at a time and
  /// idle workers steal pending ones.
  pub fn new(workers: usize, csv: CsvOptions) -> std::result::Result<Self, ThreadPoolBuildError> {
    let workers = workers.max(1);
    let pool = ThreadPoolBuilder::new()
      .num_threads(workers)
      .thread_name(|idx| format!("partscan-worker-{idx}"))
      .build()?;
    Ok(ParallelRowStrategy {
      pool,
      workers,
      chunk_size: None,
      csv,
      cancel: CancelFlag::new(),
    })
  }

  /// Assign units in static chunks of `chunk_size`, each chunk scanned by one worker.
  pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
    self.chunk_size = Some(chunk_size.max(1));
    self
  }

  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Scan one batch of units. A unit's count is only added once it is complete, so a
  /// cancelled batch never contributes part of a unit.
  fn scan_batch(
    &self,
    scanner: &UnitScanner,
    units: &[Unit],
    completed: &AtomicUsize,
    total: usize,
  ) -> Result<u64> {
    let mut partial = 0;
    for unit in units {
      if self.cancel.is_cancelled() {
        return Err(Error::Cancelled {
          completed: completed.load(Ordering::Relaxed),
          total,
        });
      }
      partial += scanner.scan(unit)?;
      completed.fetch_add(1, Ordering::Relaxed);
    }
    Ok(partial)
  }
}

impl ExecutionStrategy for ParallelRowStrategy {
  fn kind(&self) -> StrategyKind {
    StrategyKind::ParallelRow
  }

  fn count(&self, dataset: &Dataset, query: &Query) -> Result<u64> {
    expect_encoding(dataset, self.kind())?;
    let scanner = UnitScanner::new(dataset, query, self.csv)?;
    let units = dataset.units();
    let completed = AtomicUsize::new(0);
    let chunk_size = self.chunk_size.unwrap_or(1);

    let total = self.pool.install(|| {
      units
        .par_chunks(chunk_size)
        .map(|chunk| self.scan_batch(&scanner, chunk, &completed, units.len()))
        .try_reduce(|| 0, |a, b| Ok(a + b))
    })?;

    debug!(
      units = units.len(),
      workers = self.workers,
      chunk_size,
      total,
      "parallel scan finished"
    );
    Ok(total)
  }
}
