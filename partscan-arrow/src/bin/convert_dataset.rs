use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use partscan_arrow::{convert_dataset, Compression, CsvOptions, EncodeOptions};
use partscan_core::{Dataset, Schema};
use tracing_subscriber::EnvFilter;

/// Converts a (possibly hive-partitioned) directory of CSV units into parquet units.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
  /// Root directory of the row encoded dataset
  input: PathBuf,
  #[clap(long, short, help = "Root directory to write the column encoded dataset to")]
  output: PathBuf,
  #[clap(
    long,
    help = "Declared columns as `name:type[!],...`, types: string, int64, int32, timestamp"
  )]
  schema: String,
  #[clap(long, default_value = "snappy", help = "none, snappy or zstd")]
  compression: Compression,
  #[clap(long, default_value_t = partscan_arrow::codec::DEFAULT_ROW_GROUP_SIZE)]
  row_group_size: usize,
  #[clap(long, default_value_t = ',')]
  delimiter: char,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  anyhow::ensure!(args.delimiter.is_ascii(), "delimiter must be a single ascii character");

  let schema = Schema::parse(&args.schema).context("invalid --schema")?;
  let rows = Dataset::open(&args.input, &schema)
    .with_context(|| format!("opening {}", args.input.display()))?;

  let options = EncodeOptions::default()
    .with_compression(args.compression)
    .with_row_group_size(args.row_group_size)
    .with_csv(CsvOptions::default().with_delimiter(args.delimiter as u8));
  let columns = convert_dataset(&rows, &args.output, &options)
    .with_context(|| format!("converting into {}", args.output.display()))?;

  println!(
    "converted {} units into {}",
    columns.len(),
    columns.root().display()
  );
  Ok(())
}
