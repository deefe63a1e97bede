mod common;

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use livequery::{MetricResolver, MetricResolverConfig, MetricStoreAddress, Value};

use common::{engine_with, execute, fixture_state, respond_str};

const REPLY: &str = "8 Success\n\
    FlushVersion: 1\n\
    Start: 1000\n\
    Step: 60\n\
    DSCount: 1\n\
    DSName: 1\n\
    1060: 1.0\n\
    1120: nan\n\
    1180: 3.0\n";

/// Answers one request with `reply` and returns the request line.
fn fake_daemon(socket: &Path, reply: &'static str) -> JoinHandle<String> {
    let listener = UnixListener::bind(socket).unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request = String::new();
        reader.read_line(&mut request).unwrap();
        let mut stream = stream;
        stream.write_all(reply.as_bytes()).unwrap();
        request
    })
}

fn metric_file(pnp: &Path, host: &str, file: &str) -> PathBuf {
    let dir = pnp.join(host);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file);
    fs::write(&path, b"").unwrap();
    path
}

fn resolver(pnp: &Path, store: &Path) -> MetricResolver {
    MetricResolver::new(MetricResolverConfig {
        pnp_path: pnp.to_path_buf(),
        store: Some(MetricStoreAddress::Unix(store.to_path_buf())),
        timeout: Duration::from_secs(2),
    })
}

#[test]
fn scenario_absent_series_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let pnp = dir.path().join("pnp");
    // No daemon listens here; an absent file never reaches the store.
    let engine = engine_with(fixture_state(), resolver(&pnp, &dir.path().join("rrdcached")));

    let lines = [
        "GET hosts",
        "Columns: name rrddata:m1:load1:-3600:now:60",
        "Filter: name = web01",
        "ColumnHeaders: off",
    ];
    assert_eq!(respond_str(&engine, &lines), "web01;\n");

    let result = execute(&engine, &lines);
    assert_eq!(result.rows, vec![vec![Value::from("web01"), Value::Null]]);
}

#[test]
fn fetched_series_renders_with_window() {
    let dir = tempfile::tempdir().unwrap();
    let pnp = dir.path().join("pnp");
    let store = dir.path().join("rrdcached");
    let path = metric_file(&pnp, "web01", "_HOST__load1.rrd");
    let daemon = fake_daemon(&store, REPLY);
    let engine = engine_with(fixture_state(), resolver(&pnp, &store));

    let out = respond_str(
        &engine,
        &[
            "GET hosts",
            "Columns: name rrddata:m1:load1:1000:1180:60",
            "Filter: name = web01",
            "OutputFormat: json",
            "ColumnHeaders: off",
        ],
    );
    assert_eq!(out, "[[\"web01\",[1000,1180,60,1.0,null,3.0]]]\n");

    let request = daemon.join().unwrap();
    assert_eq!(
        request,
        format!("FETCH {} AVERAGE 1000 1180\n", path.display())
    );
}

#[test]
fn service_series_uses_sanitized_description() {
    let dir = tempfile::tempdir().unwrap();
    let pnp = dir.path().join("pnp");
    let store = dir.path().join("rrdcached");
    let path = metric_file(&pnp, "web01", "CPU_load_util.rrd");
    let daemon = fake_daemon(&store, REPLY);
    let engine = engine_with(fixture_state(), resolver(&pnp, &store));

    let out = respond_str(
        &engine,
        &[
            "GET services",
            "Columns: description rrddata:u:util.max:1000:1180:120",
            "Filter: host_name = web01",
            "Filter: description = CPU load",
            "ColumnHeaders: off",
        ],
    );
    // Two samples per bucket, the maximum of each; gaps are skipped.
    assert_eq!(out, "CPU load;1000,1240,120,1,3\n");

    let request = daemon.join().unwrap();
    assert!(request.contains(&path.display().to_string()), "{request}");
    assert!(request.contains(" MAX 1000 1180"), "{request}");
}

#[test]
fn unreachable_store_degrades_the_cell_only() {
    let dir = tempfile::tempdir().unwrap();
    let pnp = dir.path().join("pnp");
    metric_file(&pnp, "web01", "_HOST__load1.rrd");
    let engine = engine_with(fixture_state(), resolver(&pnp, &dir.path().join("nodaemon")));

    let lines = [
        "GET hosts",
        "Columns: name rrddata:m1:load1:-3600:now:60",
        "ColumnHeaders: off",
    ];
    let result = execute(&engine, &lines);
    assert_eq!(result.rows.len(), 3);
    assert!(result.rows[0][1].is_unavailable());
    // No file for the other hosts.
    assert_eq!(result.rows[1][1], Value::Null);

    let out = respond_str(&engine, &lines);
    let rows: Vec<&str> = out.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("web01;ERROR: "), "{out}");
    assert!(rows[0].contains("unreachable"), "{out}");
    assert_eq!(&rows[1..], ["web02;", "db01;"]);

    let json_lines = [
        "GET hosts",
        "Columns: name rrddata:m1:load1:-3600:now:60",
        "OutputFormat: json",
        "ColumnHeaders: off",
    ];
    let body: serde_json::Value =
        serde_json::from_str(&respond_str(&engine, &json_lines)).unwrap();
    assert!(body[0][1]["error"].as_str().is_some_and(|e| !e.is_empty()));
    assert!(body[1][1].is_null());
    assert!(body[2][1].is_null());
}

#[test]
fn missing_file_reported_by_daemon_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let pnp = dir.path().join("pnp");
    let store = dir.path().join("rrdcached");
    metric_file(&pnp, "db01", "_HOST__rta.rrd");
    let daemon = fake_daemon(&store, "-1 No such file: rta.rrd\n");
    let engine = engine_with(fixture_state(), resolver(&pnp, &store));

    let result = execute(
        &engine,
        &[
            "GET hosts",
            "Columns: rrddata:r:rta:-600:now:60",
            "Filter: name = db01",
        ],
    );
    assert_eq!(result.rows, vec![vec![Value::Null]]);
    daemon.join().unwrap();
}
