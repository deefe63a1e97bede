//! Object graph materialized by the monitoring core.
//!
//! The engine never creates these objects; it reads them under the core's
//! read guard. They are serializable so a core can hand over its state as a
//! snapshot file.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored host together with its services.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub address: String,
    /// 0 = UP, 1 = DOWN, 2 = UNREACHABLE.
    #[serde(default)]
    pub state: i64,
    #[serde(default)]
    pub has_been_checked: bool,
    #[serde(default)]
    pub plugin_output: String,
    #[serde(default)]
    pub perf_data: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_interval: f64,
    #[serde(default)]
    pub latency: f64,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub custom_variables: BTreeMap<String, String>,
    /// Opaque structured status document attached by the core.
    #[serde(default)]
    pub structured_status: Vec<u8>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Host {
    /// Creates a host with the given name and defaults elsewhere.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            ..Self::default()
        }
    }

    /// Adds a service to this host.
    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Returns the worst state among this host's services (0 if none).
    #[must_use]
    pub fn worst_service_state(&self) -> i64 {
        self.services
            .iter()
            .map(|s| s.state)
            .max()
            .unwrap_or(0)
    }
}

/// A service attached to a host.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub description: String,
    /// 0 = OK, 1 = WARN, 2 = CRIT, 3 = UNKNOWN.
    #[serde(default)]
    pub state: i64,
    #[serde(default)]
    pub has_been_checked: bool,
    #[serde(default)]
    pub plugin_output: String,
    #[serde(default)]
    pub perf_data: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_interval: f64,
    #[serde(default)]
    pub latency: f64,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl Service {
    /// Creates a checked service in the given state.
    #[must_use]
    pub fn new(description: impl Into<String>, state: i64) -> Self {
        Self {
            description: description.into(),
            state,
            has_been_checked: true,
            ..Self::default()
        }
    }
}

/// Class of a monitoring log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogClass {
    Info,
    Alert,
    Program,
    Notification,
    Passive,
    Command,
    State,
}

impl LogClass {
    /// Numeric class code as exposed in the `log` table.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Info => 0,
            Self::Alert => 1,
            Self::Program => 2,
            Self::Notification => 3,
            Self::Passive => 4,
            Self::Command => 5,
            Self::State => 6,
        }
    }
}

/// One entry of the monitoring log.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub class: LogClass,
    /// Entry type, e.g. `SERVICE ALERT`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(default)]
    pub state: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// The complete state the monitoring core exposes to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreState {
    /// When the monitoring core was started.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub program_start: DateTime<Utc>,
    /// Hosts in configuration order.
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Log entries, oldest first.
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

impl Default for CoreState {
    fn default() -> Self {
        Self {
            program_start: Utc::now(),
            hosts: Vec::new(),
            log: Vec::new(),
        }
    }
}

impl CoreState {
    /// Total number of services across all hosts.
    #[must_use]
    pub fn num_services(&self) -> usize {
        self.hosts.iter().map(|h| h.services.len()).sum()
    }

    /// Finds a host by name.
    #[must_use]
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Finds a host by name for mutation.
    pub fn host_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.hosts.iter_mut().find(|h| h.name == name)
    }

    /// Restores chronological order of the log (stable for equal times).
    pub fn normalize(&mut self) {
        self.log.sort_by_key(|e| e.time);
    }
}
