//! Query execution against the monitoring core.
//!
//! One evaluation holds the core's read guard for its whole table pass, so it
//! sees a single consistent state. Values are copied out while the guard is
//! held; metric cells are only recorded and fetched after it is released.

mod control;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::catalog::{Catalog, Row, ScanContext, StatusInfo};
use crate::core::{CoreState, MonitoringCore};
use crate::error::{LiveError, LiveResult};
use crate::metric::{MetricRequest, MetricResolver};
use crate::query::{Accumulator, Query, StatsSpec};
use crate::time::ClockSkew;
use crate::value::Value;

pub use control::{ExecutionControl, PeerProbe, PROBE_INTERVAL};

/// Version reported in the `status` table.
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server-wide counters shown in the `status` table.
#[derive(Debug, Default)]
pub struct ServerCounters {
    connections: AtomicU64,
    requests: AtomicU64,
    active: AtomicUsize,
}

impl ServerCounters {
    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate instead of wrapping on unbalanced calls.
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn request_served(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// The result of one evaluation: header names and engine-local rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// A metric cell awaiting resolution at `rows[row][column]`.
struct PendingMetric {
    row: usize,
    column: usize,
    request: MetricRequest,
}

/// Evaluates parsed queries against the current monitoring core.
pub struct QueryEngine {
    catalog: Arc<Catalog>,
    core: RwLock<Arc<MonitoringCore>>,
    metrics: MetricResolver,
    counters: Arc<ServerCounters>,
}

impl QueryEngine {
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, core: Arc<MonitoringCore>, metrics: MetricResolver) -> Self {
        Self {
            catalog,
            core: RwLock::new(core),
            metrics,
            counters: Arc::new(ServerCounters::default()),
        }
    }

    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    #[must_use]
    pub const fn counters(&self) -> &Arc<ServerCounters> {
        &self.counters
    }

    #[must_use]
    pub const fn metrics(&self) -> &MetricResolver {
        &self.metrics
    }

    /// The core new evaluations run against.
    pub fn core(&self) -> LiveResult<Arc<MonitoringCore>> {
        let guard = self
            .core
            .read()
            .map_err(|_| LiveError::internal("core binding lock poisoned"))?;
        Ok(Arc::clone(&guard))
    }

    /// Binds a new core. Running evaluations finish on the old one.
    pub fn rebind(&self, core: Arc<MonitoringCore>) -> LiveResult<()> {
        let mut guard = self
            .core
            .write()
            .map_err(|_| LiveError::internal("core binding lock poisoned"))?;
        *guard = core;
        Ok(())
    }

    fn status_info(&self, state: &CoreState) -> StatusInfo {
        StatusInfo {
            program_start: state.program_start,
            program_version: PROGRAM_VERSION,
            num_hosts: state.hosts.len(),
            num_services: state.num_services(),
            connections: self.counters.connections(),
            requests: self.counters.requests(),
            active_connections: self.counters.active(),
        }
    }

    /// Evaluates a query.
    ///
    /// Fails only on cancellation or internal errors; metric failures are
    /// embedded in the affected cells.
    pub fn execute(
        &self,
        query: &Query,
        control: &mut ExecutionControl<'_>,
    ) -> LiveResult<ResultSet> {
        let core = self.core()?;
        let (rows, pending) = {
            let state = core.read()?;
            let status = self.status_info(&state);
            let scan = ScanContext {
                state: &state,
                columns: self.catalog.column_infos(),
                status: &status,
            };
            let pass = if query.is_stats() {
                (aggregate(query, scan, control)?, Vec::new())
            } else {
                self.project(query, scan, control)?
            };
            pass
        };

        let mut rows = rows;
        if !pending.is_empty() {
            debug!(table = query.table.name(), cells = pending.len(), "resolving metric cells");
        }
        for cell in pending {
            control.before_blocking()?;
            rows[cell.row][cell.column] = self.metrics.resolve(&cell.request);
        }

        Ok(ResultSet {
            columns: query.column_names(),
            rows,
        })
    }

    fn project(
        &self,
        query: &Query,
        scan: ScanContext<'_>,
        control: &mut ExecutionControl<'_>,
    ) -> LiveResult<(Vec<Vec<Value>>, Vec<PendingMetric>)> {
        let mut rows = Vec::new();
        let mut pending = Vec::new();

        for row in query.table.rows(scan) {
            if query.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            control.row()?;
            if !query.filter.matches(&row, query.skew) {
                continue;
            }

            let mut cells = Vec::with_capacity(query.columns.len());
            for (idx, column) in query.columns.iter().enumerate() {
                match column.metric_spec() {
                    Some(spec) => {
                        pending.push(PendingMetric {
                            row: rows.len(),
                            column: idx,
                            request: MetricRequest {
                                location: self.metrics.locate(&row, &spec.metric),
                                spec: spec.clone(),
                            },
                        });
                        cells.push(Value::Null);
                    }
                    None => cells.push(localize(column.extract(&row), query.skew)),
                }
            }
            rows.push(cells);
        }

        trace!(table = query.table.name(), rows = rows.len(), "projection done");
        Ok((rows, pending))
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("catalog", &self.catalog)
            .field("metrics", &self.metrics)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

/// Shifts times into the client's clock.
fn localize(value: Value, skew: ClockSkew) -> Value {
    match value {
        Value::Time(t) => Value::Time(skew.to_client(t)),
        other => other,
    }
}

/// Stats mode: one accumulator set per group, groups in order of first
/// appearance. Without grouping columns there is exactly one group.
fn aggregate(
    query: &Query,
    scan: ScanContext<'_>,
    control: &mut ExecutionControl<'_>,
) -> LiveResult<Vec<Vec<Value>>> {
    let fresh = || query.stats.iter().map(StatsSpec::accumulator).collect::<Vec<_>>();

    let mut groups: Vec<(Vec<Value>, Vec<Accumulator<'_>>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    if query.columns.is_empty() {
        groups.push((Vec::new(), fresh()));
    }

    let mut matched = 0usize;
    for row in query.table.rows(scan) {
        if query.limit.is_some_and(|limit| matched >= limit) {
            break;
        }
        control.row()?;
        if !query.filter.matches(&row, query.skew) {
            continue;
        }
        matched += 1;

        let slot = if query.columns.is_empty() {
            0
        } else {
            let key: Vec<Value> = query
                .columns
                .iter()
                .map(|c| localize(c.extract(&row), query.skew))
                .collect();
            let fingerprint = group_fingerprint(&key)?;
            *index.entry(fingerprint).or_insert_with(|| {
                groups.push((key, fresh()));
                groups.len() - 1
            })
        };
        fold(&mut groups[slot].1, &row, query.skew);
    }

    Ok(groups
        .into_iter()
        .map(|(mut key, accumulators)| {
            key.extend(accumulators.iter().map(Accumulator::finish));
            key
        })
        .collect())
}

fn fold(accumulators: &mut [Accumulator<'_>], row: &Row<'_>, skew: ClockSkew) {
    for acc in accumulators {
        acc.update(row, skew);
    }
}

fn group_fingerprint(key: &[Value]) -> LiveResult<String> {
    serde_json::to_string(key).map_err(|e| LiveError::internal(format!("group key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Host, Service};
    use crate::query::parse_request;

    fn engine() -> QueryEngine {
        let mut state = CoreState::default();
        state.hosts.push(
            Host::new("web01")
                .with_service(Service::new("CPU", 0))
                .with_service(Service::new("Disk", 2)),
        );
        state.hosts.push(Host::new("db01").with_service(Service::new("CPU", 1)));
        QueryEngine::new(
            Arc::new(Catalog::new()),
            Arc::new(MonitoringCore::new(state)),
            MetricResolver::disabled(),
        )
    }

    fn run(engine: &QueryEngine, request: &str) -> ResultSet {
        let lines: Vec<&str> = request.lines().collect();
        let query = parse_request(&lines, engine.catalog()).unwrap();
        engine.execute(&query, &mut ExecutionControl::unbounded()).unwrap()
    }

    #[test]
    fn test_projection() {
        let engine = engine();
        let result = run(&engine, "GET hosts\nColumns: name num_services");
        assert_eq!(result.columns, vec!["name", "num_services"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::from("web01"), Value::Int(2)],
                vec![Value::from("db01"), Value::Int(1)],
            ]
        );
    }

    #[test]
    fn test_limit() {
        let engine = engine();
        assert!(run(&engine, "GET services\nLimit: 0").rows.is_empty());
        assert_eq!(run(&engine, "GET services\nLimit: 2").rows.len(), 2);
        assert_eq!(run(&engine, "GET services\nLimit: 99").rows.len(), 3);
    }

    #[test]
    fn test_stats_without_columns() {
        let engine = engine();
        let result = run(
            &engine,
            "GET services\nStats: state = 0\nStats: state = 2\nStats: max state",
        );
        assert_eq!(result.rows, vec![vec![Value::Int(1), Value::Int(1), Value::Int(2)]]);

        let result = run(&engine, "GET services\nFilter: state = 5\nStats: state = 0");
        assert_eq!(result.rows, vec![vec![Value::Int(0)]]);
    }

    #[test]
    fn test_stats_grouped_by_first_appearance() {
        let engine = engine();
        let result = run(&engine, "GET services\nColumns: description\nStats: state >= 1");
        assert_eq!(result.columns, vec!["description", "stats_1"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::from("CPU"), Value::Int(1)],
                vec![Value::from("Disk"), Value::Int(1)],
            ]
        );
    }

    #[test]
    fn test_status_counters() {
        let engine = engine();
        engine.counters().connection_opened();
        engine.counters().request_served();
        let result = run(
            &engine,
            "GET status\nColumns: num_hosts num_services connections active_connections",
        );
        assert_eq!(
            result.rows,
            vec![vec![Value::Int(2), Value::Int(3), Value::Int(1), Value::Int(1)]]
        );
        engine.counters().connection_closed();
        engine.counters().connection_closed();
        assert_eq!(engine.counters().active(), 0);
    }

    #[test]
    fn test_rebind() {
        let engine = engine();
        engine
            .rebind(Arc::new(MonitoringCore::new(CoreState::default())))
            .unwrap();
        assert!(run(&engine, "GET hosts\nColumns: name").rows.is_empty());
    }

    #[test]
    fn test_metric_cells_without_store_are_null() {
        let engine = engine();
        let result = run(&engine, "GET hosts\nColumns: name rrddata:r:rta:-60:now:60");
        assert_eq!(result.rows[0][1], Value::Null);
    }

    #[test]
    fn test_cancelled_by_shutdown() {
        let engine = engine();
        let query = parse_request(&["GET services"], engine.catalog()).unwrap();
        let flag = std::sync::atomic::AtomicBool::new(true);
        let err = engine
            .execute(&query, &mut ExecutionControl::unbounded().with_shutdown(&flag))
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
