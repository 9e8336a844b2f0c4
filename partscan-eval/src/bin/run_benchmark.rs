use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use partscan_arrow::{convert_dataset, EncodeOptions};
use partscan_core::{Dataset, Query, Schema};
use partscan_eval::{
  config::available_parallelism,
  util::{generate_trip_dataset, trip_schema, TripDatasetSpec},
  BenchConfig, BenchmarkInputs, StrategyKind,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Times every count strategy over the same dataset and checks that they agree.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
  #[clap(long, help = "Root directory of the row encoded dataset")]
  rows: PathBuf,
  #[clap(long, help = "Root directory of the column encoded dataset")]
  columns: PathBuf,
  #[clap(
    long,
    help = "Declared columns as `name:type[!],...`, defaults to the synthetic trip schema"
  )]
  schema: Option<String>,
  #[clap(long, help = "Generate a synthetic trip dataset into --rows first")]
  generate: bool,
  #[clap(long, default_value_t = 100_000)]
  rows_per_unit: usize,
  #[clap(long, default_value_t = 2)]
  units_per_partition: usize,
  #[clap(long, default_value_t = 64)]
  seed: u64,
  #[clap(long, help = "Convert --rows into --columns before running")]
  convert: bool,
  #[clap(long, requires = "value", help = "Column compared by the predicate")]
  column: Option<String>,
  #[clap(long, requires = "column")]
  value: Option<String>,
  #[clap(long, default_value_t = available_parallelism())]
  workers: usize,
  #[clap(long, default_value_t = partscan_arrow::rows::DEFAULT_BATCH_SIZE)]
  batch_size: usize,
  #[clap(long, default_value_t = 1)]
  warmup: usize,
  #[clap(long, default_value_t = 3)]
  iterations: usize,
  #[clap(long, value_enum, value_delimiter = ',', help = "Strategies to run, all by default")]
  strategies: Vec<StrategyKind>,
  #[clap(long, help = "Write the report as JSON to this file")]
  report: Option<PathBuf>,
}

impl Args {
  fn config(&self) -> BenchConfig {
    let strategies = if self.strategies.is_empty() {
      StrategyKind::ALL.to_vec()
    } else {
      self.strategies.clone()
    };
    BenchConfig::default()
      .with_workers(self.workers)
      .with_batch_size(self.batch_size)
      .with_warmup(self.warmup)
      .with_iterations(self.iterations)
      .with_strategies(strategies)
  }

  fn query(&self) -> Query {
    match (&self.column, &self.value) {
      (Some(column), Some(value)) => Query::count_where(column, value),
      _ => Query::count_all(),
    }
  }
}

fn prepare(args: &Args) -> Result<BenchmarkInputs> {
  let schema = match &args.schema {
    Some(text) => Schema::parse(text).context("invalid --schema")?,
    None => trip_schema(),
  };

  if args.generate {
    let spec = TripDatasetSpec {
      units_per_partition: args.units_per_partition,
      rows_per_unit: args.rows_per_unit,
      seed: args.seed,
      ..Default::default()
    };
    let generated = generate_trip_dataset(&args.rows, &spec)?;
    info!(
      units = generated.units.len(),
      rows = generated.total_rows,
      "generated trip dataset"
    );
  }

  let rows = Dataset::open(&args.rows, &schema)
    .with_context(|| format!("opening {}", args.rows.display()))?;
  let columns = if args.convert || args.generate {
    let options = EncodeOptions::default().with_csv(args.config().csv_options());
    convert_dataset(&rows, &args.columns, &options)
      .with_context(|| format!("converting into {}", args.columns.display()))?
  } else {
    Dataset::open(&args.columns, &schema)
      .with_context(|| format!("opening {}", args.columns.display()))?
  };
  Ok(BenchmarkInputs { rows, columns })
}

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let inputs = prepare(&args)?;
  let harness = args.config().build_harness()?;
  let report = harness.run(&inputs, &args.query());

  print!("{}", report.to_csv());
  if let Some(path) = &args.report {
    fs::write(path, report.to_json()?).with_context(|| format!("writing {}", path.display()))?;
  }

  match report.verify() {
    Ok(count) => {
      info!(count, "all strategies agree");
      Ok(ExitCode::SUCCESS)
    }
    Err(err) => {
      error!(error = %err, "verification failed");
      Ok(ExitCode::FAILURE)
    }
  }
}
