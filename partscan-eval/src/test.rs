use std::{fs, path::Path};

use partscan_arrow::{convert_dataset, CsvOptions, EncodeOptions};
use partscan_core::{Dataset, Error, Query, Schema, UnitEncoding};
use rstest::rstest;
use tempfile::TempDir;

use crate::{
  util::{generate_trip_dataset, trip_schema, TripDatasetSpec, LICENSE_COLUMN},
  BenchConfig, BenchmarkInputs, CancelFlag, ExecutionStrategy, ParallelRowStrategy,
  SequentialRowStrategy, StrategyKind,
};

fn write_unit(root: &Path, relative: &str, contents: &str) {
  let path = root.join(relative);
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, contents).unwrap();
}

fn schema() -> Schema {
  Schema::parse("predicate_col:string,fare:int64").unwrap()
}

/// Unit A holds [HV0005, X, HV0005], unit B holds [HV0005, HV0005, Y].
fn scenario(dir: &TempDir, a: &str, b: &str) -> BenchmarkInputs {
  let rows_root = dir.path().join("rows");
  write_unit(
    &rows_root,
    a,
    "predicate_col,fare\nHV0005,10\nX,11\nHV0005,12\n",
  );
  write_unit(
    &rows_root,
    b,
    "predicate_col,fare\nHV0005,13\nHV0005,14\nY,15\n",
  );
  let rows = Dataset::open(&rows_root, &schema()).unwrap();
  let columns = convert_dataset(&rows, dir.path().join("columns"), &EncodeOptions::default()).unwrap();
  BenchmarkInputs { rows, columns }
}

fn strategies() -> Vec<Box<dyn ExecutionStrategy>> {
  let config = BenchConfig::default().with_workers(2);
  StrategyKind::ALL
    .into_iter()
    .map(|kind| config.build_strategy(kind).unwrap())
    .collect()
}

fn count_with_all(inputs: &BenchmarkInputs, query: &Query) -> Vec<(StrategyKind, u64)> {
  strategies()
    .iter()
    .map(|s| {
      let count = s
        .count(inputs.dataset(s.encoding()), query)
        .unwrap_or_else(|e| panic!("{} failed: {e}", s.kind()));
      (s.kind(), count)
    })
    .collect()
}

#[rstest]
#[case("a.csv", "b.csv")]
#[case("year=2020/month=3/a.csv", "year=2021/month=1/b.csv")]
fn test_scenario_every_strategy_counts_four(#[case] a: &str, #[case] b: &str) {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, a, b);
  for (kind, count) in count_with_all(&inputs, &Query::count_where("predicate_col", "HV0005")) {
    assert_eq!(count, 4, "{kind}");
  }
}

#[rstest]
#[case(Query::count_where("predicate_col", "X"), 1)]
#[case(Query::count_where("predicate_col", "hv0005"), 0)]
#[case(Query::count_where("fare", "14"), 1)]
#[case(Query::count_where("year", "2020"), 3)]
#[case(Query::count_where("month", "1"), 3)]
#[case(Query::count_where("year", "1999"), 0)]
#[case(Query::count_all().with_column("fare"), 6)]
fn test_strategies_agree(#[case] query: Query, #[case] expected: u64) {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "year=2020/month=3/a.csv", "year=2021/month=1/b.csv");
  for (kind, count) in count_with_all(&inputs, &query) {
    assert_eq!(count, expected, "{kind}");
  }
}

#[test]
fn test_partition_column_is_not_stored() {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "year=2020/month=3/data.csv", "year=2020/month=4/data.csv");
  let metadata = partscan_arrow::unit_metadata(inputs.columns.units()[0].path()).unwrap();
  assert!(metadata.column("year").is_none());

  for (kind, count) in count_with_all(&inputs, &Query::count_where("year", "2020")) {
    assert_eq!(count, 6, "{kind}");
  }
}

#[test]
fn test_empty_dataset_counts_zero() {
  let inputs = BenchmarkInputs {
    rows: Dataset::new("/nowhere", &schema(), UnitEncoding::Row, vec![]).unwrap(),
    columns: Dataset::new("/nowhere", &schema(), UnitEncoding::Column, vec![]).unwrap(),
  };
  for (kind, count) in count_with_all(&inputs, &Query::count_where("predicate_col", "HV0005")) {
    assert_eq!(count, 0, "{kind}");
  }
}

fn subset(dataset: &Dataset, keep: usize) -> Dataset {
  Dataset::new(
    dataset.root(),
    &schema(),
    dataset.encoding(),
    dataset.units()[..keep].to_vec(),
  )
  .unwrap()
}

#[test]
fn test_subset_handle_counts_only_its_units() {
  let dir = TempDir::new().unwrap();
  let full = scenario(&dir, "year=2020/month=3/a.csv", "year=2021/month=1/b.csv");
  let inputs = BenchmarkInputs {
    rows: subset(&full.rows, 1),
    columns: subset(&full.columns, 1),
  };
  assert_eq!(inputs.columns.partition_keys(), &["year", "month"]);

  for (kind, count) in count_with_all(&inputs, &Query::count_where("predicate_col", "HV0005")) {
    assert_eq!(count, 2, "{kind}");
  }
  for (kind, count) in count_with_all(&inputs, &Query::count_where("year", "2021")) {
    assert_eq!(count, 0, "{kind}");
  }
}

#[test]
fn test_skipped_files_are_not_counted() {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "a.csv", "b.csv");
  let column_unit = inputs.columns.units()[0].path();
  fs::copy(column_unit, inputs.columns.root().join("_extra.parquet")).unwrap();
  fs::copy(column_unit, inputs.columns.root().join(".hidden.parquet")).unwrap();
  let row_unit = inputs.rows.units()[0].path();
  fs::copy(row_unit, inputs.rows.root().join("_extra.csv")).unwrap();

  for (kind, count) in count_with_all(&inputs, &Query::count_where("predicate_col", "HV0005")) {
    assert_eq!(count, 4, "{kind}");
  }

  let reopened = BenchmarkInputs {
    rows: Dataset::open(inputs.rows.root(), &schema()).unwrap(),
    columns: Dataset::open(inputs.columns.root(), &schema()).unwrap(),
  };
  assert_eq!(reopened.columns.len(), 2);
  for (kind, count) in count_with_all(&reopened, &Query::count_all()) {
    assert_eq!(count, 6, "{kind}");
  }
}

#[rstest]
#[case(Query::count_where("predicate_col", "HV0005"), 2)]
#[case(Query::count_where("fare", "11"), 1)]
#[case(Query::count_all(), 3)]
fn test_zero_byte_unit_counts_zero(#[case] query: Query, #[case] expected: u64) {
  let dir = TempDir::new().unwrap();
  let rows_root = dir.path().join("rows");
  write_unit(
    &rows_root,
    "a.csv",
    "predicate_col,fare\nHV0005,10\nX,11\nHV0005,12\n",
  );
  write_unit(&rows_root, "b.csv", "");
  let rows = Dataset::open(&rows_root, &schema()).unwrap();
  assert_eq!(rows.len(), 2);
  let columns = convert_dataset(&rows, dir.path().join("columns"), &EncodeOptions::default()).unwrap();
  let inputs = BenchmarkInputs { rows, columns };

  for (kind, count) in count_with_all(&inputs, &query) {
    assert_eq!(count, expected, "{kind}");
  }
}

#[test]
fn test_missing_column_fails_every_strategy() {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "a.csv", "b.csv");
  let query = Query::count_where("vendor", "HV0005");
  for strategy in strategies() {
    let result = strategy.count(inputs.dataset(strategy.encoding()), &query);
    assert!(
      matches!(result, Err(Error::ColumnNotFound { .. })),
      "{}: {result:?}",
      strategy.kind()
    );
  }
}

#[test]
fn test_wrong_encoding_is_rejected() {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "a.csv", "b.csv");
  let query = Query::count_where("predicate_col", "HV0005");
  for strategy in strategies() {
    let other = match strategy.encoding() {
      UnitEncoding::Row => &inputs.columns,
      UnitEncoding::Column => &inputs.rows,
    };
    assert!(matches!(
      strategy.count(other, &query),
      Err(Error::SchemaViolation { .. })
    ));
  }
}

#[test]
fn test_malformed_unselected_column_does_not_fail_row_scans() {
  let dir = TempDir::new().unwrap();
  let rows_root = dir.path().join("rows");
  write_unit(&rows_root, "a.csv", "predicate_col,fare\nHV0005,ten\nX,11\n");
  let rows = Dataset::open(&rows_root, &schema()).unwrap();
  let query = Query::count_where("predicate_col", "HV0005");

  let sequential = SequentialRowStrategy::default();
  assert_eq!(sequential.count(&rows, &query).unwrap(), 1);
  let parallel = ParallelRowStrategy::new(2, CsvOptions::default()).unwrap();
  assert_eq!(parallel.count(&rows, &query).unwrap(), 1);

  assert!(matches!(
    sequential.count(&rows, &Query::count_where("fare", "11")),
    Err(Error::SchemaViolation { .. })
  ));
}

fn generated(dir: &TempDir) -> (BenchmarkInputs, crate::util::GeneratedDataset) {
  let spec = TripDatasetSpec {
    rows_per_unit: 2_000,
    ..Default::default()
  };
  let generated = generate_trip_dataset(dir.path().join("rows"), &spec).unwrap();
  let rows = Dataset::open(dir.path().join("rows"), &trip_schema()).unwrap();
  let options = EncodeOptions::default().with_row_group_size(500);
  let columns = convert_dataset(&rows, dir.path().join("columns"), &options).unwrap();
  (BenchmarkInputs { rows, columns }, generated)
}

#[test]
fn test_generated_dataset_cross_strategy_agreement() {
  let dir = TempDir::new().unwrap();
  let (inputs, generated) = generated(&dir);

  for (license, expected) in &generated.rows_per_license {
    let query = Query::count_where(LICENSE_COLUMN, license.clone());
    for (kind, count) in count_with_all(&inputs, &query) {
      assert_eq!(count, *expected, "{kind} {license}");
    }
  }

  let query = Query::count_where("year", "2021");
  for (kind, count) in count_with_all(&inputs, &query) {
    assert_eq!(count, generated.rows_per_year[&2021], "{kind}");
  }
}

#[rstest]
#[case(1, None)]
#[case(2, None)]
#[case(4, None)]
#[case(2, Some(1))]
#[case(3, Some(2))]
#[case(4, Some(5))]
fn test_parallel_split_is_commutative(#[case] workers: usize, #[case] chunk_size: Option<usize>) {
  let dir = TempDir::new().unwrap();
  let (inputs, generated) = generated(&dir);
  let query = Query::count_where(LICENSE_COLUMN, "HV0005");

  let single = ParallelRowStrategy::new(1, CsvOptions::default())
    .unwrap()
    .with_chunk_size(inputs.rows.len());
  let expected = single.count(&inputs.rows, &query).unwrap();
  assert_eq!(expected, generated.rows_per_license["HV0005"]);

  let mut strategy = ParallelRowStrategy::new(workers, CsvOptions::default()).unwrap();
  if let Some(chunk_size) = chunk_size {
    strategy = strategy.with_chunk_size(chunk_size);
  }
  assert_eq!(strategy.count(&inputs.rows, &query).unwrap(), expected);
}

#[test]
fn test_cancelled_parallel_run_returns_no_count() {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "a.csv", "b.csv");
  let cancel = CancelFlag::new();
  let strategy = ParallelRowStrategy::new(2, CsvOptions::default())
    .unwrap()
    .with_cancel_flag(cancel.clone());

  let query = Query::count_where("predicate_col", "HV0005");
  cancel.cancel();
  let result = strategy.count(&inputs.rows, &query);
  assert!(matches!(
    result,
    Err(Error::Cancelled { completed: 0, total: 2 })
  ));
  assert!(strategy.count(&inputs.rows, &query).is_err());

  cancel.reset();
  assert_eq!(strategy.count(&inputs.rows, &query).unwrap(), 4);
}

#[test]
fn test_harness_end_to_end() {
  let dir = TempDir::new().unwrap();
  let inputs = scenario(&dir, "year=2020/month=3/a.csv", "year=2021/month=1/b.csv");
  let harness = BenchConfig::default()
    .with_workers(2)
    .with_warmup(1)
    .with_iterations(2)
    .build_harness()
    .unwrap();

  let report = harness.run(&inputs, &Query::count_where("predicate_col", "HV0005"));
  assert_eq!(report.records.len(), 4);
  assert_eq!(report.verify(), Ok(4));
  let names: Vec<_> = report.rows().into_iter().map(|r| r.strategy).collect();
  assert_eq!(
    names,
    vec!["sequential-row", "parallel-row", "deferred-plan", "engine"]
  );
}
