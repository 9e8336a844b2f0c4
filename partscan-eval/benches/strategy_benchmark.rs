//! Times each strategy over a generated, hive-partitioned trip dataset. The row encoded units are
//! generated and converted once per run into a temporary directory, so every strategy reads the
//! same data from a warm page cache.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use partscan_arrow::{convert_dataset, EncodeOptions};
use partscan_core::{Dataset, Query};
use partscan_eval::{
  util::{generate_trip_dataset, trip_schema, TripDatasetSpec, LICENSE_COLUMN},
  BenchConfig, BenchmarkInputs, ExecutionStrategy, StrategyKind,
};
use tempfile::TempDir;

fn bench_strategies(criterion: &mut Criterion) {
  let dir = TempDir::new().unwrap();
  let spec = TripDatasetSpec {
    rows_per_unit: 50_000,
    ..Default::default()
  };
  generate_trip_dataset(dir.path().join("rows"), &spec).unwrap();
  let rows = Dataset::open(dir.path().join("rows"), &trip_schema()).unwrap();
  let columns =
    convert_dataset(&rows, dir.path().join("columns"), &EncodeOptions::default()).unwrap();
  let inputs = BenchmarkInputs { rows, columns };

  let queries = [
    ("license", Query::count_where(LICENSE_COLUMN, "HV0005")),
    ("year", Query::count_where("year", "2021")),
  ];
  let config = BenchConfig::default();

  for (label, query) in &queries {
    let mut group = criterion.benchmark_group(format!("Count by {label}"));
    group.sample_size(10);
    for kind in StrategyKind::ALL {
      let strategy = config.build_strategy(kind).unwrap();
      let dataset = inputs.dataset(strategy.encoding());
      group.bench_function(BenchmarkId::new(kind.name(), config.workers), |b| {
        b.iter(|| strategy.count(dataset, query).unwrap())
      });
    }
    group.finish();
  }
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
