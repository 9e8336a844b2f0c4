//! This crate provides the data model shared by every scan strategy:
//! - the declared [`Schema`] of a dataset and the [`Query`] evaluated against it
//! - partition-aware discovery of the units making up a [`Dataset`]
//! - the [`Error`] taxonomy surfaced by conversion and scanning

pub mod dataset;
pub mod error;
pub mod query;
pub mod schema;

pub use dataset::{locate, Dataset, Layout, Unit, UnitEncoding};
pub use error::{Error, Result};
pub use query::{Literal, Predicate, Query, ResolvedPredicate, ResolvedQuery};
pub use schema::{ColumnType, Field, Schema};
