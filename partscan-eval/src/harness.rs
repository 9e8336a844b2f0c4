//! Runs every strategy against the same query and dataset, times it, and checks that all
//! strategies agree on the total. Agreement is the harness's correctness check; a strategy that
//! fails is reported as failed without stopping the others.

use std::time::{Duration, Instant};

use partscan_core::{Dataset, Error, Query, Result, UnitEncoding};
use serde::Serialize;
use tracing::{info, warn};

use crate::ExecutionStrategy;

/// The row encoded dataset and its column encoded conversion.
#[derive(Debug, Clone)]
pub struct BenchmarkInputs {
  pub rows: Dataset,
  pub columns: Dataset,
}

impl BenchmarkInputs {
  pub fn dataset(&self, encoding: UnitEncoding) -> &Dataset {
    match encoding {
      UnitEncoding::Row => &self.rows,
      UnitEncoding::Column => &self.columns,
    }
  }
}

#[derive(Debug)]
pub struct BenchmarkRecord {
  pub strategy: String,
  /// Mean wall-clock time of the measured iterations.
  pub elapsed: Duration,
  pub outcome: Result<u64>,
}

/// A record as handed to downstream reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
  pub strategy: String,
  pub elapsed_seconds: f64,
  pub result_count: Option<u64>,
  pub error: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VerificationError {
  #[error("no strategy completed successfully")]
  NoSuccessfulStrategy,
  #[error("strategies disagree: {}", format_counts(.counts))]
  Disagreement { counts: Vec<(String, u64)> },
}

fn format_counts(counts: &[(String, u64)]) -> String {
  counts
    .iter()
    .map(|(name, count)| format!("{name}={count}"))
    .collect::<Vec<_>>()
    .join(", ")
}

#[derive(Debug)]
pub struct BenchmarkReport {
  pub query: Query,
  pub records: Vec<BenchmarkRecord>,
}

impl BenchmarkReport {
  /// The total every successful strategy agrees on.
  pub fn verify(&self) -> std::result::Result<u64, VerificationError> {
    let counts: Vec<(String, u64)> = self
      .records
      .iter()
      .filter_map(|r| r.outcome.as_ref().ok().map(|c| (r.strategy.clone(), *c)))
      .collect();
    let Some((_, first)) = counts.first() else {
      warn!("verification failed: no strategy completed successfully");
      return Err(VerificationError::NoSuccessfulStrategy);
    };
    let first = *first;
    if counts.iter().any(|(_, c)| *c != first) {
      let err = VerificationError::Disagreement { counts };
      warn!(error = %err, "verification failed");
      return Err(err);
    }
    Ok(first)
  }

  pub fn rows(&self) -> Vec<ReportRow> {
    self
      .records
      .iter()
      .map(|r| ReportRow {
        strategy: r.strategy.clone(),
        elapsed_seconds: r.elapsed.as_secs_f64(),
        result_count: r.outcome.as_ref().ok().copied(),
        error: r.outcome.as_ref().err().map(|e| e.to_string()),
      })
      .collect()
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&self.rows())
  }

  /// `strategy,elapsed_seconds,result_count` lines with a header. Failed strategies have an
  /// empty count.
  pub fn to_csv(&self) -> String {
    let mut out = String::from("strategy,elapsed_seconds,result_count\n");
    for row in self.rows() {
      let count = row.result_count.map(|c| c.to_string()).unwrap_or_default();
      out.push_str(&format!(
        "{},{:.6},{}\n",
        row.strategy, row.elapsed_seconds, count
      ));
    }
    out
  }
}

pub struct BenchmarkHarness {
  strategies: Vec<Box<dyn ExecutionStrategy>>,
  warmup: usize,
  iterations: usize,
}

impl Default for BenchmarkHarness {
  fn default() -> Self {
    BenchmarkHarness {
      strategies: Vec::new(),
      warmup: 0,
      iterations: 1,
    }
  }
}

impl BenchmarkHarness {
  pub fn new() -> Self {
    BenchmarkHarness::default()
  }

  pub fn with_strategy(mut self, strategy: Box<dyn ExecutionStrategy>) -> Self {
    self.strategies.push(strategy);
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

  pub fn strategies(&self) -> impl Iterator<Item = &dyn ExecutionStrategy> {
    self.strategies.iter().map(|s| s.as_ref())
  }

  /// Run every strategy in registration order.
  pub fn run(&self, inputs: &BenchmarkInputs, query: &Query) -> BenchmarkReport {
    let records = self
      .strategies
      .iter()
      .map(|strategy| self.run_strategy(strategy.as_ref(), inputs, query))
      .collect();
    BenchmarkReport {
      query: query.clone(),
      records,
    }
  }

  fn run_strategy(
    &self,
    strategy: &dyn ExecutionStrategy,
    inputs: &BenchmarkInputs,
    query: &Query,
  ) -> BenchmarkRecord {
    let name = strategy.kind().to_string();
    let dataset = inputs.dataset(strategy.encoding());

    let mut elapsed = Duration::ZERO;
    let mut measured = 0u32;
    let mut outcome = Ok(0);
    for iteration in 0..self.warmup + self.iterations {
      let start = Instant::now();
      let result = strategy.count(dataset, query);
      let took = start.elapsed();

      if iteration >= self.warmup {
        elapsed += took;
        measured += 1;
      }
      match result {
        Ok(count) => match outcome {
          Ok(previous) if iteration > 0 && previous != count => {
            outcome = Err(Error::UnstableCount {
              previous,
              current: count,
            });
            break;
          }
          _ => outcome = Ok(count),
        },
        Err(err) => {
          outcome = Err(err);
          break;
        }
      }
    }
    let elapsed = if measured == 0 {
      Duration::ZERO
    } else {
      elapsed / measured
    };

    match &outcome {
      Ok(count) => info!(
        strategy = %name,
        elapsed_seconds = elapsed.as_secs_f64(),
        count,
        "strategy finished"
      ),
      Err(err) => warn!(strategy = %name, error = %err, "strategy failed"),
    }
    BenchmarkRecord {
      strategy: name,
      elapsed,
      outcome,
    }
  }
}
