//! This crate implements the evaluation infrastructure of the project, including:
//! - Four execution strategies answering the same count query over the same dataset
//! - A benchmark harness timing each strategy and checking that they agree
//! - Run configuration and synthetic dataset generation

#[cfg(test)]
mod test;

pub mod config;
pub mod engine;
pub mod harness;
pub mod lazy;
pub mod parallel;
pub mod sequential;
pub mod util;

use std::{fmt, str::FromStr};

use partscan_core::{Dataset, Error, Query, Result, UnitEncoding};
use serde::Serialize;

pub use config::BenchConfig;
pub use engine::EngineStrategy;
pub use harness::{
  BenchmarkHarness, BenchmarkInputs, BenchmarkRecord, BenchmarkReport, ReportRow, VerificationError,
};
pub use lazy::{DeferredPlanStrategy, LazyFrame};
pub use parallel::{CancelFlag, ParallelRowStrategy};
pub use sequential::SequentialRowStrategy;

/// One way of answering a count query over a dataset.
///
/// Strategies hold no state across calls: `count` is a pure function of the dataset and the
/// query, so any subset of units can be re-scanned to verify a result.
pub trait ExecutionStrategy: Send + Sync {
  fn kind(&self) -> StrategyKind;

  /// Encoding of the dataset the strategy reads.
  fn encoding(&self) -> UnitEncoding {
    self.kind().encoding()
  }

  fn count(&self, dataset: &Dataset, query: &Query) -> Result<u64>;
}

/// Reject a dataset the strategy was not built for.
pub(crate) fn expect_encoding(dataset: &Dataset, kind: StrategyKind) -> Result<()> {
  if dataset.encoding() != kind.encoding() {
    return Err(Error::schema_violation(format!(
      "{kind} reads {:?} encoded units, dataset at {} is {:?} encoded",
      kind.encoding(),
      dataset.root().display(),
      dataset.encoding()
    )));
  }
  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
  /// Full scan of the row encoded units, one unit after another.
  SequentialRow,
  /// The sequential per-unit scan fanned out over a fixed-size worker pool.
  ParallelRow,
  /// A lazy plan over the column encoded units, executed on demand.
  DeferredPlan,
  /// An embedded query engine over the column encoded units.
  Engine,
}

impl StrategyKind {
  pub const ALL: [StrategyKind; 4] = [
    StrategyKind::SequentialRow,
    StrategyKind::ParallelRow,
    StrategyKind::DeferredPlan,
    StrategyKind::Engine,
  ];

  pub fn name(self) -> &'static str {
    match self {
      StrategyKind::SequentialRow => "sequential-row",
      StrategyKind::ParallelRow => "parallel-row",
      StrategyKind::DeferredPlan => "deferred-plan",
      StrategyKind::Engine => "engine",
    }
  }

  pub fn encoding(self) -> UnitEncoding {
    match self {
      StrategyKind::SequentialRow | StrategyKind::ParallelRow => UnitEncoding::Row,
      StrategyKind::DeferredPlan | StrategyKind::Engine => UnitEncoding::Column,
    }
  }
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for StrategyKind {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    StrategyKind::ALL
      .into_iter()
      .find(|kind| kind.name() == s)
      .ok_or_else(|| format!("unknown strategy {s:?}"))
  }
}
