//! Declared dataset schema.
//!
//! A [`Schema`] is fixed for the life of a dataset and is checked exactly once, when a row
//! encoded unit is converted to its column encoded form. Every later read assumes the values of a
//! column already conform to its [`ColumnType`].

use std::{fmt, str::FromStr};

use crate::{Error, Result};

/// Primitive column types a dataset may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
  Utf8,
  Int64,
  Int32,
  /// A timestamp kept in its textual form. Values must parse as `YYYY-MM-DD HH:MM:SS`.
  Timestamp,
}

impl ColumnType {
  /// String-like types are compared bytewise, integer types numerically.
  pub fn is_textual(self) -> bool {
    matches!(self, ColumnType::Utf8 | ColumnType::Timestamp)
  }
}

impl FromStr for ColumnType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "utf8" | "string" | "str" => Ok(ColumnType::Utf8),
      "int64" | "i64" | "long" => Ok(ColumnType::Int64),
      "int32" | "i32" | "int" => Ok(ColumnType::Int32),
      "timestamp" | "datetime" => Ok(ColumnType::Timestamp),
      other => Err(Error::schema_violation(format!(
        "unknown column type {other:?}"
      ))),
    }
  }
}

impl fmt::Display for ColumnType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ColumnType::Utf8 => "utf8",
      ColumnType::Int64 => "int64",
      ColumnType::Int32 => "int32",
      ColumnType::Timestamp => "timestamp",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
  pub name: String,
  pub column_type: ColumnType,
  pub nullable: bool,
}

impl Field {
  pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
    Field {
      name: name.into(),
      column_type,
      nullable,
    }
  }
}

/// An ordered mapping from column name to [`ColumnType`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
  fields: Vec<Field>,
}

impl Schema {
  /// Build a schema, rejecting duplicate column names.
  pub fn new(fields: Vec<Field>) -> Result<Self> {
    for (idx, field) in fields.iter().enumerate() {
      if field.name.is_empty() {
        return Err(Error::schema_violation("empty column name"));
      }
      if fields[..idx].iter().any(|f| f.name == field.name) {
        return Err(Error::schema_violation(format!(
          "duplicate column {:?}",
          field.name
        )));
      }
    }
    Ok(Schema { fields })
  }

  /// Parse the compact `name:type[!]` list used on the command line, for example
  /// `hvfhs_license_num:string,trip_miles:int64!`. A trailing `!` marks the column as not
  /// nullable.
  pub fn parse(spec: &str) -> Result<Self> {
    let mut fields = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
      let (name, ty) = entry.split_once(':').ok_or_else(|| {
        Error::schema_violation(format!("expected `name:type`, got {entry:?}"))
      })?;
      let (ty, nullable) = match ty.trim().strip_suffix('!') {
        Some(ty) => (ty, false),
        None => (ty, true),
      };
      fields.push(Field::new(name.trim(), ty.parse()?, nullable));
    }
    Schema::new(fields)
  }

  pub fn fields(&self) -> &[Field] {
    &self.fields
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn field(&self, name: &str) -> Option<&Field> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.fields.iter().position(|f| f.name == name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.fields.iter().map(|f| f.name.as_str())
  }

  /// The schema without the named columns, used to split synthetic partition columns from the
  /// physically stored ones.
  pub fn without<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Schema {
    let names: Vec<&str> = names.into_iter().collect();
    Schema {
      fields: self
        .fields
        .iter()
        .filter(|f| !names.contains(&f.name.as_str()))
        .cloned()
        .collect(),
    }
  }

  pub(crate) fn push(&mut self, field: Field) {
    self.fields.push(field);
  }
}

impl fmt::Display for Schema {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, field) in self.fields.iter().enumerate() {
      if idx > 0 {
        f.write_str(",")?;
      }
      write!(f, "{}:{}", field.name, field.column_type)?;
      if !field.nullable {
        f.write_str("!")?;
      }
    }
    Ok(())
  }
}
