//! This crate consists of the integration point between the dataset model and apache arrow /
//! parquet. It has responsibilities for:
//! 1. Reading row encoded (delimited text) units with column projection
//! 2. Encoding row encoded units into column encoded parquet units, and decoding selected columns
//!    back without touching the others
//! 3. Counting predicate matches unit by unit over either encoding
//! 4. Converting a whole partitioned dataset, plus a binary performing the conversion based on
//!    command-line arguments

pub mod codec;
pub mod convert;
pub mod rows;
pub mod scan;
pub mod types;

pub use codec::{decode_unit, encode_unit, unit_metadata, Compression, EncodeOptions};
pub use convert::convert_dataset;
pub use rows::CsvOptions;
pub use scan::{count_equal, UnitScanner};
