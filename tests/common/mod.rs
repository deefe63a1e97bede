#![allow(dead_code)]

use std::sync::Arc;

use livequery::query::ResponseHeader;
use livequery::{
    parse_request, render_error, render_response, Catalog, CoreState, ExecutionControl, Host,
    MetricResolver, MonitoringCore, QueryEngine, ResultSet, Service,
};

/// Three hosts, five services.
pub fn fixture_state() -> CoreState {
    let mut web01 = Host::new("web01")
        .with_service(Service::new("CPU load", 0))
        .with_service(Service::new("Disk /", 2));
    web01.address = "10.0.0.1".to_string();
    web01.groups = vec!["linux".to_string(), "web".to_string()];
    web01.latency = 0.25;

    let mut web02 = Host::new("web02")
        .with_service(Service::new("CPU load", 1))
        .with_service(Service::new("Disk /", 0));
    web02.address = "10.0.0.2".to_string();
    web02.groups = vec!["linux".to_string(), "web".to_string()];
    web02.latency = 0.75;

    let mut db01 = Host::new("db01").with_service(Service::new("Uptime", 2));
    db01.address = "10.0.0.5".to_string();
    db01.state = 1;
    db01.groups = vec!["linux".to_string(), "db".to_string()];
    db01.latency = 1.5;

    let mut state = CoreState::default();
    state.hosts = vec![web01, web02, db01];
    state
}

pub fn engine_with(state: CoreState, metrics: MetricResolver) -> Arc<QueryEngine> {
    Arc::new(QueryEngine::new(
        Arc::new(Catalog::new()),
        Arc::new(MonitoringCore::new(state)),
        metrics,
    ))
}

pub fn engine(state: CoreState) -> Arc<QueryEngine> {
    engine_with(state, MetricResolver::disabled())
}

/// Parses and evaluates a request the way a connection does.
pub fn execute(engine: &QueryEngine, lines: &[&str]) -> ResultSet {
    let query = parse_request(lines, engine.catalog()).unwrap();
    engine
        .execute(&query, &mut ExecutionControl::default())
        .unwrap()
}

/// Complete response bytes for a request.
pub fn respond(engine: &QueryEngine, lines: &[&str]) -> Vec<u8> {
    match parse_request(lines, engine.catalog()) {
        Ok(query) => {
            let result = engine
                .execute(&query, &mut ExecutionControl::default())
                .unwrap();
            render_response(&result, &query.output)
        }
        Err(e) => render_error(e.status_code(), &e.to_string(), ResponseHeader::Off),
    }
}

pub fn respond_str(engine: &QueryEngine, lines: &[&str]) -> String {
    String::from_utf8(respond(engine, lines)).unwrap()
}
