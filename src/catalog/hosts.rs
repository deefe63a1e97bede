//! The `hosts` table.

use crate::core::Host;
use crate::metric::{perf_data_metric_names, MetricColumnSpec};
use crate::value::Value;

use super::{Column, ColumnType, DynamicColumn, Row, ScanContext, Schema, Table};

fn host_column(
    name: &'static str,
    column_type: ColumnType,
    description: &'static str,
    extract: fn(&Host) -> Value,
) -> Column {
    Column::new(name, column_type, description, move |row| {
        row.host().map_or(Value::Null, extract)
    })
}

/// Columns describing a host.
///
/// They read through [`Row::host`], so the services table re-exports them
/// under a `host_` prefix.
pub(super) fn host_columns() -> Vec<Column> {
    use ColumnType::{Blob, Float, Int, List, Time};

    vec![
        host_column("name", ColumnType::String, "Host name", |h| Value::from(h.name.as_str())),
        host_column("alias", ColumnType::String, "Alias of the host", |h| {
            Value::from(h.alias.as_str())
        }),
        host_column("address", ColumnType::String, "IP address", |h| {
            Value::from(h.address.as_str())
        }),
        host_column("state", Int, "State: 0 up, 1 down, 2 unreachable", |h| {
            Value::Int(h.state)
        }),
        host_column("has_been_checked", Int, "Whether the host has been checked (0/1)", |h| {
            Value::from(h.has_been_checked)
        }),
        host_column("plugin_output", ColumnType::String, "Output of the last check", |h| {
            Value::from(h.plugin_output.as_str())
        }),
        host_column("perf_data", ColumnType::String, "Performance data of the last check", |h| {
            Value::from(h.perf_data.as_str())
        }),
        host_column("metrics", List, "Names of the metrics in the performance data", |h| {
            Value::List(perf_data_metric_names(&h.perf_data))
        }),
        host_column("last_check", Time, "Time of the last check", |h| {
            Value::Time(h.last_check.unwrap_or_default())
        }),
        host_column("check_interval", Float, "Check interval in minutes", |h| {
            Value::Float(h.check_interval)
        }),
        host_column("latency", Float, "Check latency in seconds", |h| {
            Value::Float(h.latency)
        }),
        host_column("groups", List, "Host groups", |h| Value::List(h.groups.clone())),
        host_column("contacts", List, "Contacts of the host", |h| {
            Value::List(h.contacts.clone())
        }),
        host_column("custom_variable_names", List, "Names of the custom variables", |h| {
            Value::List(h.custom_variables.keys().cloned().collect())
        }),
        host_column("custom_variable_values", List, "Values of the custom variables", |h| {
            Value::List(h.custom_variables.values().cloned().collect())
        }),
        host_column("num_services", Int, "Number of services of the host", |h| {
            Value::from(h.services.len())
        }),
        host_column("worst_service_state", Int, "Worst state of the host's services", |h| {
            Value::Int(h.worst_service_state())
        }),
        host_column("services", List, "Descriptions of the host's services", |h| {
            Value::List(h.services.iter().map(|s| s.description.clone()).collect())
        }),
        host_column(
            "services_with_state",
            List,
            "Services as (description, state, has_been_checked)",
            |h| {
                Value::Tuples(
                    h.services
                        .iter()
                        .map(|s| {
                            vec![
                                Value::from(s.description.as_str()),
                                Value::Int(s.state),
                                Value::from(s.has_been_checked),
                            ]
                        })
                        .collect(),
                )
            },
        ),
        host_column("structured_status", Blob, "Structured status document", |h| {
            Value::Blob(h.structured_status.clone())
        }),
    ]
}

fn build_rrddata(name: &str, args: &str) -> Result<Column, String> {
    let spec = MetricColumnSpec::parse(args)?;
    Ok(Column::metric(name, spec))
}

/// The `rrddata:<alias>:<metric>[.<cf>]:<start>:<end>:<resolution>[:<max>]` family.
pub(super) const fn rrddata_family() -> DynamicColumn {
    DynamicColumn::new(
        "rrddata",
        "Metric history: \
         rrddata:<alias>:<metric>[.<cf>]:<start>:<end>:<resolution>[:<max_entries>]",
        build_rrddata,
    )
}

/// Monitored hosts in configuration order.
pub struct HostsTable {
    schema: Schema,
}

impl HostsTable {
    #[must_use]
    pub fn new() -> Self {
        let mut schema = Schema::new();
        for column in host_columns() {
            schema.push(column);
        }
        schema.push_dynamic(rrddata_family());
        Self { schema }
    }
}

impl Default for HostsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for HostsTable {
    fn name(&self) -> &'static str {
        "hosts"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows<'a>(&self, scan: ScanContext<'a>) -> Box<dyn Iterator<Item = Row<'a>> + 'a> {
        Box::new(scan.state.hosts.iter().map(Row::Host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Service;

    fn extract(table: &HostsTable, column: &str, host: &Host) -> Value {
        table.column(column).unwrap().extract(&Row::Host(host))
    }

    #[test]
    fn test_host_columns() {
        let table = HostsTable::new();
        let mut host = Host::new("web01")
            .with_service(Service::new("CPU", 1))
            .with_service(Service::new("Disk", 2));
        host.perf_data = "rta=0.5ms;200;500;0; pl=0%;80;100;;".to_string();
        host.groups = vec!["linux".to_string()];

        assert_eq!(extract(&table, "name", &host), Value::from("web01"));
        assert_eq!(extract(&table, "num_services", &host), Value::Int(2));
        assert_eq!(extract(&table, "worst_service_state", &host), Value::Int(2));
        assert_eq!(
            extract(&table, "metrics", &host),
            Value::List(vec!["rta".to_string(), "pl".to_string()])
        );
        assert_eq!(
            extract(&table, "groups", &host),
            Value::List(vec!["linux".to_string()])
        );
        assert_eq!(extract(&table, "last_check", &host).as_f64(), Some(0.0));
    }

    #[test]
    fn test_services_with_state() {
        let table = HostsTable::new();
        let host = Host::new("h").with_service(Service::new("CPU", 1));
        let Value::Tuples(tuples) = extract(&table, "services_with_state", &host) else {
            panic!("expected tuples");
        };
        assert_eq!(
            tuples,
            vec![vec![Value::from("CPU"), Value::Int(1), Value::Int(1)]]
        );
    }

    #[test]
    fn test_rrddata_rejects_bad_arguments() {
        let table = HostsTable::new();
        assert!(table.resolve_column("rrddata:m1:load1:-3600:now").is_err());
        assert!(table.resolve_column("rrddata:m1:load1:-3600:now:60").is_ok());
    }
}
