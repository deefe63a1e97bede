use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use livequery::{
    parse_request, render_response, Catalog, CoreState, ExecutionControl, Host, MetricResolver,
    MonitoringCore, QueryEngine, Service,
};

/// 1000 hosts with 20 services each.
fn make_engine() -> QueryEngine {
    let hosts = (0..1000u32)
        .map(|h| {
            let mut host = Host::new(format!("host{h:04}"));
            host.groups = vec!["linux".to_string(), format!("rack{}", h % 10)];
            (0..20u32).fold(host, |host, s| {
                host.with_service(Service::new(format!("service {s}"), i64::from((h + s) % 4)))
            })
        })
        .collect();
    let state = CoreState {
        hosts,
        ..CoreState::default()
    };
    QueryEngine::new(
        Arc::new(Catalog::new()),
        Arc::new(MonitoringCore::new(state)),
        MetricResolver::disabled(),
    )
}

fn run(engine: &QueryEngine, lines: &[&str]) -> usize {
    let query = parse_request(lines, engine.catalog()).unwrap();
    let result = engine
        .execute(&query, &mut ExecutionControl::default())
        .unwrap();
    render_response(&result, &query.output).len()
}

fn bench_filters(c: &mut Criterion) {
    let engine = make_engine();
    let mut group = c.benchmark_group("query_eval/filter");
    group.throughput(Throughput::Elements(20_000));

    group.bench_function("int_equality", |b| {
        b.iter(|| {
            black_box(run(
                &engine,
                &["GET services", "Columns: host_name description state", "Filter: state = 2"],
            ))
        });
    });

    group.bench_function("regex_or_negate", |b| {
        b.iter(|| {
            black_box(run(
                &engine,
                &[
                    "GET services",
                    "Columns: host_name description",
                    "Filter: host_name ~ 7$",
                    "Filter: description ~~ SERVICE 1",
                    "Or: 2",
                    "Filter: host_groups >= rack3",
                    "Negate:",
                ],
            ))
        });
    });

    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let engine = make_engine();
    let mut group = c.benchmark_group("query_eval/stats");
    group.throughput(Throughput::Elements(20_000));

    group.bench_function("state_counts", |b| {
        b.iter(|| {
            black_box(run(
                &engine,
                &[
                    "GET services",
                    "Stats: state = 0",
                    "Stats: state = 1",
                    "Stats: state = 2",
                    "Stats: state = 3",
                ],
            ))
        });
    });

    group.bench_function("grouped_by_host", |b| {
        b.iter(|| {
            black_box(run(
                &engine,
                &["GET services", "Columns: host_name", "Stats: state max", "Stats: state = 2"],
            ))
        });
    });

    group.bench_function("json_output", |b| {
        b.iter(|| {
            black_box(run(
                &engine,
                &["GET hosts", "Columns: name groups num_services", "OutputFormat: json"],
            ))
        });
    });

    group.finish();
}

criterion_group!(query_eval, bench_filters, bench_stats);
criterion_main!(query_eval);
