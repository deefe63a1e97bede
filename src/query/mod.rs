//! Query representation and the request parser.
//!
//! A request block is parsed into a [`Query`] before any row is read. Every
//! column it references exists and every literal has been type-checked, so
//! execution cannot fail on the request itself.

pub mod filter;
pub mod output;
pub mod parser;
pub mod stats;

use std::fmt;
use std::sync::Arc;

use crate::catalog::{Column, Table};
use crate::time::ClockSkew;

pub use filter::{Comparison, Filter, Operator};
pub use output::{OutputFormat, OutputOptions, ResponseHeader, Separators};
pub use parser::{parse_request, prescan, RequestFlags, MAX_REQUEST_BYTES, MAX_REQUEST_LINES};
pub use stats::{Accumulator, StatsFunction, StatsSpec};

/// A parsed, validated query.
#[derive(Clone)]
pub struct Query {
    pub table: Arc<dyn Table>,
    /// Projected columns; with stats these are the grouping columns.
    pub columns: Vec<Column>,
    pub filter: Filter,
    /// Stats entries in push order.
    pub stats: Vec<StatsSpec>,
    pub output: OutputOptions,
    /// Maximum number of matching rows.
    pub limit: Option<usize>,
    pub keep_alive: bool,
    pub skew: ClockSkew,
}

impl Query {
    /// A query returning every column of `table`.
    #[must_use]
    pub fn new(table: Arc<dyn Table>) -> Self {
        let columns = table.schema().columns().to_vec();
        Self {
            table,
            columns,
            filter: Filter::all(),
            stats: Vec::new(),
            output: OutputOptions::default(),
            limit: None,
            keep_alive: false,
            skew: ClockSkew::NONE,
        }
    }

    /// Returns true if the query aggregates instead of listing rows.
    #[must_use]
    pub fn is_stats(&self) -> bool {
        !self.stats.is_empty()
    }

    /// Header names: the columns, then `stats_1..n`.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.name().to_string())
            .chain((1..=self.stats.len()).map(|i| format!("stats_{i}")))
            .collect()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table.name())
            .field("columns", &self.columns.iter().map(Column::name).collect::<Vec<_>>())
            .field("filter", &self.filter)
            .field("stats", &self.stats.len())
            .field("output", &self.output)
            .field("limit", &self.limit)
            .field("keep_alive", &self.keep_alive)
            .field("skew", &self.skew)
            .finish()
    }
}
