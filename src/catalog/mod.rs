//! Table catalog: the virtual tables a query can address.
//!
//! Every table exposes a [`Schema`] of typed columns and a lazy row iterator
//! over the monitoring core's current state. A fresh iteration is taken for
//! every query.

mod column;
mod columns;
mod hosts;
mod log;
mod services;
mod status;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::{CoreState, Host, LogEntry, Service};
use crate::error::ProtocolError;

pub use column::{Column, ColumnSource, ColumnType, DynamicColumn, Extractor, Schema};
pub use columns::ColumnsTable;
pub use hosts::HostsTable;
pub use log::LogTable;
pub use services::ServicesTable;
pub use status::StatusTable;

/// Non-owning handle to one row of a table.
///
/// Valid only while the query holds the core's read guard.
#[derive(Debug, Clone, Copy)]
pub enum Row<'a> {
    Host(&'a Host),
    Service {
        host: &'a Host,
        service: &'a Service,
    },
    Log(&'a LogEntry),
    Column(&'a ColumnInfo),
    Status(&'a StatusInfo),
}

impl<'a> Row<'a> {
    /// The host this row belongs to (host and service rows).
    #[must_use]
    pub const fn host(&self) -> Option<&'a Host> {
        match self {
            Self::Host(host) | Self::Service { host, .. } => Some(*host),
            _ => None,
        }
    }

    /// The service of a service row.
    #[must_use]
    pub const fn service(&self) -> Option<&'a Service> {
        match self {
            Self::Service { service, .. } => Some(*service),
            _ => None,
        }
    }
}

/// One row of the `columns` table.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,
    pub column_type: &'static str,
    pub description: String,
}

/// The single row of the `status` table.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub program_start: DateTime<Utc>,
    pub program_version: &'static str,
    pub num_hosts: usize,
    pub num_services: usize,
    pub connections: u64,
    pub requests: u64,
    pub active_connections: usize,
}

/// Everything a table needs to produce its rows for one query pass.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    /// Core state under the read guard.
    pub state: &'a CoreState,
    /// Introspection rows for the `columns` table.
    pub columns: &'a [ColumnInfo],
    /// Status record for the `status` table.
    pub status: &'a StatusInfo,
}

/// A named, typed collection of rows.
pub trait Table: Send + Sync {
    /// Table name as used in `GET <name>`.
    fn name(&self) -> &'static str;

    /// Column set of this table.
    fn schema(&self) -> &Schema;

    /// A fresh lazy iteration over the table's rows.
    fn rows<'a>(&self, scan: ScanContext<'a>) -> Box<dyn Iterator<Item = Row<'a>> + 'a>;

    /// Resolves a column, including dynamic columns, with a detailed error.
    fn resolve_column(&self, name: &str) -> Result<Column, ProtocolError> {
        self.schema().resolve(self.name(), name)
    }

    /// Looks up a column by name.
    fn column(&self, name: &str) -> Option<Column> {
        self.resolve_column(name).ok()
    }
}

/// Registry of all tables.
pub struct Catalog {
    tables: BTreeMap<&'static str, Arc<dyn Table>>,
    column_infos: Vec<ColumnInfo>,
}

impl Catalog {
    /// Creates the catalog with the standard tables.
    #[must_use]
    pub fn new() -> Self {
        let tables: Vec<Arc<dyn Table>> = vec![
            Arc::new(HostsTable::new()),
            Arc::new(ServicesTable::new()),
            Arc::new(LogTable::new()),
            Arc::new(StatusTable::new()),
            Arc::new(ColumnsTable::new()),
        ];

        let mut column_infos = Vec::new();
        for table in &tables {
            let schema = table.schema();
            column_infos.extend(schema.columns().iter().map(|c| ColumnInfo {
                table: table.name().to_string(),
                name: c.name().to_string(),
                column_type: c.column_type().name(),
                description: c.description().to_string(),
            }));
            column_infos.extend(schema.dynamic_columns().iter().map(|d| ColumnInfo {
                table: table.name().to_string(),
                name: d.prefix().to_string(),
                column_type: ColumnType::List.name(),
                description: d.description().to_string(),
            }));
        }

        Self {
            tables: tables.into_iter().map(|t| (t.name(), t)).collect(),
            column_infos,
        }
    }

    /// Resolves a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Arc<dyn Table>> {
        self.tables.get(name).cloned()
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.keys().copied()
    }

    /// Introspection rows for the `columns` table.
    #[must_use]
    pub fn column_infos(&self) -> &[ColumnInfo] {
        &self.column_infos
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .finish()
    }
}
