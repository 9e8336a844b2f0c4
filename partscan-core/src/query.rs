use crate::{
  schema::{ColumnType, Schema},
  Error, Result,
};

/// An equality predicate as supplied by a caller: column name and the textual value to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
  pub column: String,
  pub value: String,
}

/// A count query: the columns a scan must read, and at most one equality predicate.
///
/// Queries are immutable values. Evaluating one never mutates the dataset it runs against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
  columns: Vec<String>,
  predicate: Option<Predicate>,
}

impl Query {
  /// Count every row of the dataset.
  pub fn count_all() -> Self {
    Query::default()
  }

  /// Count the rows where `column` equals `value`.
  pub fn count_where(column: impl Into<String>, value: impl Into<String>) -> Self {
    Query {
      columns: Vec::new(),
      predicate: Some(Predicate {
        column: column.into(),
        value: value.into(),
      }),
    }
  }

  /// Request an additional output column. A count needs none, but the scan still has to prove the
  /// column exists and must read it.
  pub fn with_column(mut self, column: impl Into<String>) -> Self {
    let column = column.into();
    if !self.columns.contains(&column) {
      self.columns.push(column);
    }
    self
  }

  pub fn predicate(&self) -> Option<&Predicate> {
    self.predicate.as_ref()
  }

  /// Predicate column first, followed by the explicitly requested columns, without duplicates.
  pub fn wanted_columns(&self) -> Vec<&str> {
    let mut wanted: Vec<&str> = Vec::with_capacity(self.columns.len() + 1);
    if let Some(predicate) = &self.predicate {
      wanted.push(&predicate.column);
    }
    for column in &self.columns {
      if !wanted.contains(&column.as_str()) {
        wanted.push(column);
      }
    }
    wanted
  }

  /// Bind the query to a schema: every wanted column must exist, and the predicate value must
  /// coerce to its column's declared type.
  pub fn resolve(&self, schema: &Schema) -> Result<ResolvedQuery> {
    for column in self.wanted_columns() {
      if schema.field(column).is_none() {
        return Err(Error::column_not_found(column));
      }
    }

    let predicate = match &self.predicate {
      Some(Predicate { column, value }) => {
        // Checked above.
        let field = schema
          .field(column)
          .ok_or_else(|| Error::column_not_found(column))?;
        Some(ResolvedPredicate {
          column: column.clone(),
          column_type: field.column_type,
          literal: Literal::parse(field.column_type, value).map_err(|message| {
            Error::schema_violation(format!("predicate on {column:?}: {message}"))
          })?,
        })
      }
      None => None,
    };

    Ok(ResolvedQuery {
      wanted: self.wanted_columns().into_iter().map(String::from).collect(),
      predicate,
    })
  }
}

/// A predicate value coerced to its column's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
  Utf8(String),
  Int64(i64),
  Int32(i32),
}

impl Literal {
  pub fn parse(column_type: ColumnType, value: &str) -> std::result::Result<Literal, String> {
    match column_type {
      ColumnType::Utf8 | ColumnType::Timestamp => Ok(Literal::Utf8(value.to_string())),
      ColumnType::Int64 => value
        .trim()
        .parse()
        .map(Literal::Int64)
        .map_err(|_| format!("{value:?} is not a valid int64")),
      ColumnType::Int32 => value
        .trim()
        .parse()
        .map(Literal::Int32)
        .map_err(|_| format!("{value:?} is not a valid int32")),
    }
  }

  /// Match against a value kept in textual form, such as a partition directory name.
  pub fn matches_text(&self, text: &str) -> bool {
    match self {
      Literal::Utf8(s) => s == text,
      Literal::Int64(v) => text.trim().parse::<i64>().is_ok_and(|t| t == *v),
      Literal::Int32(v) => text.trim().parse::<i32>().is_ok_and(|t| t == *v),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPredicate {
  pub column: String,
  pub column_type: ColumnType,
  pub literal: Literal,
}

/// A [`Query`] bound to a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
  pub wanted: Vec<String>,
  pub predicate: Option<ResolvedPredicate>,
}

impl ResolvedQuery {
  /// The wanted columns that are physically stored, i.e. not synthesized from partition paths.
  pub fn physical_columns<'a>(&'a self, partition_keys: &'a [String]) -> Vec<&'a str> {
    self
      .wanted
      .iter()
      .filter(|c| !partition_keys.contains(c))
      .map(String::as_str)
      .collect()
  }
}
