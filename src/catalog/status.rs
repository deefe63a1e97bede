//! The `status` table: one row about the core and the query server.

use crate::value::Value;

use super::{Column, ColumnType, Row, ScanContext, Schema, StatusInfo, Table};

/// Protocol version reported to clients.
pub const LIVESTATUS_VERSION: &str = "1.0";

fn status_column(
    name: &'static str,
    column_type: ColumnType,
    description: &'static str,
    extract: fn(&StatusInfo) -> Value,
) -> Column {
    Column::new(name, column_type, description, move |row| match row {
        Row::Status(status) => extract(status),
        _ => Value::Null,
    })
}

/// Single-row table with global counters.
pub struct StatusTable {
    schema: Schema,
}

impl StatusTable {
    #[must_use]
    pub fn new() -> Self {
        use ColumnType::{Int, Time};

        let mut schema = Schema::new();
        let columns = [
            status_column("program_start", Time, "Start time of the monitoring core", |s| {
                Value::Time(s.program_start)
            }),
            status_column(
                "program_version",
                ColumnType::String,
                "Version of the query engine",
                |s| Value::from(s.program_version),
            ),
            status_column("livestatus_version", ColumnType::String, "Protocol version", |_| {
                Value::from(LIVESTATUS_VERSION)
            }),
            status_column("num_hosts", Int, "Number of hosts", |s| Value::from(s.num_hosts)),
            status_column("num_services", Int, "Number of services", |s| {
                Value::from(s.num_services)
            }),
            status_column("connections", Int, "Connections accepted since start", |s| {
                Value::Int(i64::try_from(s.connections).unwrap_or(i64::MAX))
            }),
            status_column("requests", Int, "Requests served since start", |s| {
                Value::Int(i64::try_from(s.requests).unwrap_or(i64::MAX))
            }),
            status_column("active_connections", Int, "Currently open connections", |s| {
                Value::from(s.active_connections)
            }),
        ];
        for column in columns {
            schema.push(column);
        }
        Self { schema }
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for StatusTable {
    fn name(&self) -> &'static str {
        "status"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows<'a>(&self, scan: ScanContext<'a>) -> Box<dyn Iterator<Item = Row<'a>> + 'a> {
        Box::new(std::iter::once(Row::Status(scan.status)))
    }
}
