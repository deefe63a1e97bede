//! The monitoring core's object graph, as seen by the query engine.

mod model;
mod state;

pub use model::{CoreState, Host, LogClass, LogEntry, Service};
pub use state::MonitoringCore;
