use std::{
  collections::BTreeMap,
  fs::{self, File},
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Result;
use arrow::{
  array::{ArrayRef, Int32Array, Int64Array, RecordBatch, StringArray},
  csv::Writer,
};
use partscan_arrow::types::arrow_schema;
use partscan_core::Schema;
use rand::{
  distributions::{Distribution, WeightedIndex},
  rngs::SmallRng,
  Rng, SeedableRng,
};
use rand_distr::LogNormal;

/// High-volume for-hire license numbers and their share of trips.
pub const LICENSES: [(&str, u32); 4] = [
  ("HV0002", 5),
  ("HV0003", 65),
  ("HV0004", 5),
  ("HV0005", 25),
];

pub const LICENSE_COLUMN: &str = "hvfhs_license_num";

/// Stored columns of a generated trip unit.
pub fn trip_schema() -> Schema {
  Schema::parse(
    "hvfhs_license_num:string!,dispatching_base_num:string,pickup_datetime:timestamp!,\
     trip_seconds:int64,pu_location_id:int32",
  )
  .expect("static schema")
}

/// Shape of a generated dataset: one `year=/month=` directory per partition, each holding
/// `units_per_partition` units of `rows_per_unit` rows.
#[derive(Debug, Clone)]
pub struct TripDatasetSpec {
  pub partitions: Vec<(u16, u8)>,
  pub units_per_partition: usize,
  pub rows_per_unit: usize,
  pub seed: u64,
}

impl Default for TripDatasetSpec {
  fn default() -> Self {
    TripDatasetSpec {
      partitions: vec![(2020, 1), (2020, 2), (2021, 1)],
      units_per_partition: 2,
      rows_per_unit: 10_000,
      seed: 64,
    }
  }
}

/// What was written, so callers can check query results against it.
#[derive(Debug, Clone, Default)]
pub struct GeneratedDataset {
  pub root: PathBuf,
  pub units: Vec<PathBuf>,
  pub total_rows: u64,
  pub rows_per_license: BTreeMap<String, u64>,
  pub rows_per_year: BTreeMap<u16, u64>,
}

/// Write a hive-partitioned CSV dataset of ride records below `root`.
pub fn generate_trip_dataset(root: impl AsRef<Path>, spec: &TripDatasetSpec) -> Result<GeneratedDataset> {
  let root = root.as_ref();
  let mut rng = SmallRng::seed_from_u64(spec.seed);
  let license_dist = WeightedIndex::new(LICENSES.iter().map(|(_, weight)| *weight))?;
  let duration_dist = LogNormal::new(6.5_f64, 0.6)?;
  let schema = arrow_schema(&trip_schema());

  let mut generated = GeneratedDataset {
    root: root.to_path_buf(),
    ..Default::default()
  };

  for &(year, month) in &spec.partitions {
    let dir = root.join(format!("year={year}")).join(format!("month={month}"));
    fs::create_dir_all(&dir)?;

    for unit_idx in 0..spec.units_per_partition {
      let n = spec.rows_per_unit;
      let mut licenses = Vec::with_capacity(n);
      let mut bases = Vec::with_capacity(n);
      let mut pickups = Vec::with_capacity(n);
      let mut durations = Vec::with_capacity(n);
      let mut locations = Vec::with_capacity(n);

      for _ in 0..n {
        let license = LICENSES[license_dist.sample(&mut rng)].0;
        *generated
          .rows_per_license
          .entry(license.to_string())
          .or_default() += 1;
        licenses.push(license);
        bases.push((rng.gen_ratio(9, 10)).then(|| format!("B{:05}", rng.gen_range(2000..3300))));
        pickups.push(format!(
          "{year:04}-{month:02}-{:02} {:02}:{:02}:{:02}",
          rng.gen_range(1..=28),
          rng.gen_range(0..24),
          rng.gen_range(0..60),
          rng.gen_range(0..60)
        ));
        durations.push(duration_dist.sample(&mut rng).round() as i64);
        locations.push(rng.gen_range(1..=265));
      }

      let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(licenses)),
        Arc::new(StringArray::from(bases)),
        Arc::new(StringArray::from(pickups)),
        Arc::new(Int64Array::from(durations)),
        Arc::new(Int32Array::from(locations)),
      ];
      let batch = RecordBatch::try_new(schema.clone(), columns)?;

      let path = dir.join(format!("part-{unit_idx:05}.csv"));
      let mut writer = Writer::new(File::create(&path)?);
      writer.write(&batch)?;

      generated.total_rows += n as u64;
      *generated.rows_per_year.entry(year).or_default() += n as u64;
      generated.units.push(path);
    }
  }

  Ok(generated)
}
