//! Column registry: typed columns and the extractors that read them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProtocolError;
use crate::metric::MetricColumnSpec;
use crate::value::Value;

use super::Row;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    Float,
    String,
    List,
    Time,
    Blob,
}

impl ColumnType {
    /// Name as shown in the `columns` table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Time => "time",
            Self::Blob => "blob",
        }
    }

    /// Returns true for types that support arithmetic aggregation.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Time)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pure function from a row handle to a value.
pub type Extractor = Arc<dyn for<'a> Fn(&Row<'a>) -> Value + Send + Sync>;

/// Where a column's value comes from.
#[derive(Clone)]
pub enum ColumnSource {
    /// Direct read of a field of the row.
    Field(Extractor),
    /// Samples fetched from the metric store for the row.
    Metric(MetricColumnSpec),
}

/// A column of a table: name, declared type, and how to extract it.
#[derive(Clone)]
pub struct Column {
    name: String,
    description: String,
    column_type: ColumnType,
    source: ColumnSource,
}

impl Column {
    /// Creates a field column.
    pub fn new<F>(
        name: impl Into<String>,
        column_type: ColumnType,
        description: impl Into<String>,
        extract: F,
    ) -> Self
    where
        F: for<'a> Fn(&Row<'a>) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            column_type,
            source: ColumnSource::Field(Arc::new(extract)),
        }
    }

    /// Creates a metric history column.
    #[must_use]
    pub fn metric(name: impl Into<String>, spec: MetricColumnSpec) -> Self {
        Self {
            name: name.into(),
            description: "Metric samples fetched from the time-series store".to_string(),
            column_type: ColumnType::List,
            source: ColumnSource::Metric(spec),
        }
    }

    /// Returns a copy of this column under a different name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        self.column_type
    }

    #[must_use]
    pub const fn source(&self) -> &ColumnSource {
        &self.source
    }

    /// Returns the metric spec for metric columns.
    #[must_use]
    pub const fn metric_spec(&self) -> Option<&MetricColumnSpec> {
        match &self.source {
            ColumnSource::Metric(spec) => Some(spec),
            ColumnSource::Field(_) => None,
        }
    }

    /// Extracts the value of this column from a row.
    ///
    /// Metric columns have no direct value; the engine resolves them through
    /// the metric store and this returns `Value::Null`.
    #[must_use]
    pub fn extract(&self, row: &Row<'_>) -> Value {
        match &self.source {
            ColumnSource::Field(extract) => extract(row),
            ColumnSource::Metric(_) => Value::Null,
        }
    }

    /// Returns true if the column may appear in `Filter:` lines.
    #[must_use]
    pub const fn is_filterable(&self) -> bool {
        matches!(self.source, ColumnSource::Field(_))
            && !matches!(self.column_type, ColumnType::Blob)
    }

    /// Returns true if the column may be aggregated by `Stats:` functions.
    #[must_use]
    pub const fn is_aggregatable(&self) -> bool {
        matches!(self.source, ColumnSource::Field(_)) && self.column_type.is_numeric()
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("type", &self.column_type)
            .field("metric", &self.metric_spec().is_some())
            .finish()
    }
}

/// Builds columns whose names carry arguments, e.g. `rrddata:m1:load1:-3600:now:60`.
#[derive(Clone)]
pub struct DynamicColumn {
    prefix: &'static str,
    description: &'static str,
    build: fn(name: &str, args: &str) -> Result<Column, String>,
}

impl DynamicColumn {
    /// Registers a dynamic column family under `prefix`.
    #[must_use]
    pub const fn new(
        prefix: &'static str,
        description: &'static str,
        build: fn(name: &str, args: &str) -> Result<Column, String>,
    ) -> Self {
        Self {
            prefix,
            description,
            build,
        }
    }

    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        self.prefix
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }
}

/// The column set of one table.
#[derive(Clone, Default)]
pub struct Schema {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    dynamic: Vec<DynamicColumn>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column. A column with an existing name is ignored.
    pub fn push(&mut self, column: Column) {
        if self.index.contains_key(column.name()) {
            return;
        }
        self.index.insert(column.name().to_string(), self.columns.len());
        self.columns.push(column);
    }

    /// Adds a dynamic column family.
    pub fn push_dynamic(&mut self, dynamic: DynamicColumn) {
        self.dynamic.push(dynamic);
    }

    /// Columns in registration order (dynamic families excluded).
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn dynamic_columns(&self) -> &[DynamicColumn] {
        &self.dynamic
    }

    /// Resolves a column by name, including dynamic columns.
    pub fn resolve(&self, table: &str, name: &str) -> Result<Column, ProtocolError> {
        if let Some(&idx) = self.index.get(name) {
            return Ok(self.columns[idx].clone());
        }

        if let Some((prefix, args)) = name.split_once(':') {
            if let Some(dynamic) = self.dynamic.iter().find(|d| d.prefix == prefix) {
                return (dynamic.build)(name, args).map_err(|reason| ProtocolError::InvalidArgument {
                    directive: prefix.to_string(),
                    reason,
                });
            }
        }

        Err(ProtocolError::UnknownColumn {
            table: table.to_string(),
            column: name.to_string(),
        })
    }
}
