//! The `services` table.
//!
//! Service rows carry a handle to their host, so every host column is also
//! available here with a `host_` prefix.

use crate::core::Service;
use crate::metric::perf_data_metric_names;
use crate::value::Value;

use super::hosts::{host_columns, rrddata_family};
use super::{Column, ColumnType, Row, ScanContext, Schema, Table};

fn service_column(
    name: &'static str,
    column_type: ColumnType,
    description: &'static str,
    extract: fn(&Service) -> Value,
) -> Column {
    Column::new(name, column_type, description, move |row| {
        row.service().map_or(Value::Null, extract)
    })
}

fn service_columns() -> Vec<Column> {
    use ColumnType::{Float, Int, List, Time};

    vec![
        service_column("description", ColumnType::String, "Service description", |s| {
            Value::from(s.description.as_str())
        }),
        service_column("state", Int, "State: 0 ok, 1 warn, 2 crit, 3 unknown", |s| {
            Value::Int(s.state)
        }),
        service_column("has_been_checked", Int, "Whether the service has been checked (0/1)", |s| {
            Value::from(s.has_been_checked)
        }),
        service_column("plugin_output", ColumnType::String, "Output of the last check", |s| {
            Value::from(s.plugin_output.as_str())
        }),
        service_column("perf_data", ColumnType::String, "Performance data of the last check", |s| {
            Value::from(s.perf_data.as_str())
        }),
        service_column("metrics", List, "Names of the metrics in the performance data", |s| {
            Value::List(perf_data_metric_names(&s.perf_data))
        }),
        service_column("last_check", Time, "Time of the last check", |s| {
            Value::Time(s.last_check.unwrap_or_default())
        }),
        service_column("check_interval", Float, "Check interval in minutes", |s| {
            Value::Float(s.check_interval)
        }),
        service_column("latency", Float, "Check latency in seconds", |s| {
            Value::Float(s.latency)
        }),
        service_column("execution_time", Float, "Check execution time in seconds", |s| {
            Value::Float(s.execution_time)
        }),
        service_column("groups", List, "Service groups", |s| Value::List(s.groups.clone())),
        service_column("contacts", List, "Contacts of the service", |s| {
            Value::List(s.contacts.clone())
        }),
    ]
}

/// All services of all hosts, host by host.
pub struct ServicesTable {
    schema: Schema,
}

impl ServicesTable {
    #[must_use]
    pub fn new() -> Self {
        let mut schema = Schema::new();
        for column in service_columns() {
            schema.push(column);
        }
        for column in host_columns() {
            let name = format!("host_{}", column.name());
            let description = format!("Host: {}", column.description());
            schema.push(column.renamed(name, description));
        }
        schema.push_dynamic(rrddata_family());
        Self { schema }
    }
}

impl Default for ServicesTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for ServicesTable {
    fn name(&self) -> &'static str {
        "services"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows<'a>(&self, scan: ScanContext<'a>) -> Box<dyn Iterator<Item = Row<'a>> + 'a> {
        Box::new(scan.state.hosts.iter().flat_map(|host| {
            host.services
                .iter()
                .map(move |service| Row::Service { host, service })
        }))
    }
}
