//! # livequery - Live status queries against a monitoring core
//!
//! livequery exposes the in-memory state of a monitoring core (hosts,
//! services, log entries) and historical performance metrics through a
//! line-based query protocol served over Unix and TCP sockets.
//!
//! ## Core Concepts
//!
//! - **Table**: a named collection of rows backed by the core's state
//! - **Column**: a typed extractor from a row to a [`Value`]
//! - **Query**: table, columns, filter tree, stats and output options
//! - **Metric column**: a column whose values are fetched from a round-robin
//!   metric store through its caching daemon
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use livequery::{parse_request, Catalog, CoreState, ExecutionControl, Host, MetricResolver,
//!     MonitoringCore, QueryEngine};
//!
//! let mut state = CoreState::default();
//! state.hosts.push(Host::new("web01"));
//! let engine = QueryEngine::new(
//!     Arc::new(Catalog::new()),
//!     Arc::new(MonitoringCore::new(state)),
//!     MetricResolver::disabled(),
//! );
//!
//! let query = parse_request(&["GET hosts", "Columns: name"], engine.catalog()).unwrap();
//! let result = engine.execute(&query, &mut ExecutionControl::default()).unwrap();
//! assert_eq!(result.rows.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Values, errors, time
pub mod error;
pub mod time;
pub mod value;

// Core state and the table catalog
pub mod catalog;
pub mod core;
pub mod metric;

// Query processing
pub mod engine;
pub mod query;
pub mod response;

// Serving
pub mod config;
pub mod logging;
pub mod server;

pub use catalog::{Catalog, Column, ColumnType, Row, Table};
pub use core::{CoreState, Host, LogClass, LogEntry, MonitoringCore, Service};
pub use engine::{ExecutionControl, PeerProbe, QueryEngine, ResultSet, ServerCounters};
pub use error::{
    LiveError, LiveResult, MetricError, ParseError, ProtocolError, RequestError, TypeMismatchError,
};
pub use metric::{MetricResolver, MetricResolverConfig, MetricSamples, MetricStoreAddress};
pub use query::{parse_request, Filter, OutputFormat, OutputOptions, Query, StatsSpec};
pub use response::{render_error, render_response};
pub use server::{ServerConfig, ServerContext};
pub use time::{ClockSkew, SampleWindow};
pub use value::Value;
