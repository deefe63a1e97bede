//! The `log` table: monitoring log entries, newest first.

use crate::core::LogEntry;
use crate::value::Value;

use super::{Column, ColumnType, Row, ScanContext, Schema, Table};

fn log_column(
    name: &'static str,
    column_type: ColumnType,
    description: &'static str,
    extract: fn(&LogEntry) -> Value,
) -> Column {
    Column::new(name, column_type, description, move |row| match row {
        Row::Log(entry) => extract(entry),
        _ => Value::Null,
    })
}

/// Monitoring log entries.
pub struct LogTable {
    schema: Schema,
}

impl LogTable {
    #[must_use]
    pub fn new() -> Self {
        let mut schema = Schema::new();
        let columns = [
            log_column("time", ColumnType::Time, "Time of the entry", |e| {
                Value::Time(e.time)
            }),
            log_column(
                "class",
                ColumnType::Int,
                "Class: 0 info, 1 alert, 2 program, 3 notification, 4 passive, 5 command, 6 state",
                |e| Value::Int(e.class.code()),
            ),
            log_column("type", ColumnType::String, "Type of the entry, e.g. SERVICE ALERT", |e| {
                Value::from(e.kind.as_str())
            }),
            log_column("host_name", ColumnType::String, "Host the entry refers to", |e| {
                Value::from(e.host_name.clone().unwrap_or_default())
            }),
            log_column(
                "service_description",
                ColumnType::String,
                "Service the entry refers to",
                |e| Value::from(e.service_description.clone().unwrap_or_default()),
            ),
            log_column("state", ColumnType::Int, "State reported by the entry", |e| {
                Value::Int(e.state.unwrap_or(0))
            }),
            log_column("message", ColumnType::String, "Complete log message", |e| {
                Value::from(e.message.as_str())
            }),
        ];
        for column in columns {
            schema.push(column);
        }
        Self { schema }
    }
}

impl Default for LogTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for LogTable {
    fn name(&self) -> &'static str {
        "log"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows<'a>(&self, scan: ScanContext<'a>) -> Box<dyn Iterator<Item = Row<'a>> + 'a> {
        // The core keeps the log oldest first.
        Box::new(scan.state.log.iter().rev().map(Row::Log))
    }
}
