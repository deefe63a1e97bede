mod common;

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use livequery::{CoreState, Host, QueryEngine, ServerConfig, ServerContext, Service};

use common::{engine, fixture_state};

fn start(max_connections: usize) -> (ServerContext, tempfile::TempDir, PathBuf) {
    start_with(engine(fixture_state()), max_connections)
}

fn start_with(
    engine: Arc<QueryEngine>,
    max_connections: usize,
) -> (ServerContext, tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("live");
    let config = ServerConfig {
        unix_socket: Some(socket.clone()),
        max_connections,
        accept_poll: Duration::from_millis(10),
        shutdown_grace: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let mut server = ServerContext::new(engine, config);
    server.start().unwrap();
    (server, dir, socket)
}

/// Reads one `fixed16` framed response: (status, body).
fn read_framed(stream: &mut impl Read) -> (u16, String) {
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).unwrap();
    let header = std::str::from_utf8(&header).unwrap();
    assert!(header.ends_with('\n'), "{header:?}");
    let status: u16 = header[..3].parse().unwrap();
    let length: usize = header[4..15].trim().parse().unwrap();
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    (status, String::from_utf8(body).unwrap())
}

fn wait_for_connections(server: &ServerContext, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.open_connections() != n && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.open_connections(), n);
}

#[test]
fn scenario_keepalive_serves_sequential_requests() {
    let (mut server, _dir, socket) = start(4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client
        .write_all(
            b"GET hosts\nColumns: name\nFilter: state = 1\n\
              KeepAlive: on\nResponseHeader: fixed16\n\n",
        )
        .unwrap();
    let (status, body) = read_framed(&mut client);
    assert_eq!(status, 200);
    assert_eq!(body, "name\ndb01\n");

    client
        .write_all(
            b"GET services\nStats: state = 2\nKeepAlive: on\n\
              ResponseHeader: fixed16\nColumnHeaders: off\n\n",
        )
        .unwrap();
    let (status, body) = read_framed(&mut client);
    assert_eq!(status, 200);
    assert_eq!(body, "2\n");

    // Still open after both responses.
    assert_eq!(server.open_connections(), 1);

    client.write_all(b"GET hosts\nColumns: name\nLimit: 1\n\n").unwrap();
    let mut rest = String::new();
    client.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "name\nweb01\n");

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn errors_keep_the_connection_when_keepalive_is_requested() {
    let (mut server, _dir, socket) = start(4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client
        .write_all(b"GET nosuchtable\nKeepAlive: on\nResponseHeader: fixed16\n\n")
        .unwrap();
    let (status, body) = read_framed(&mut client);
    assert_eq!(status, 404);
    assert!(body.contains("nosuchtable"), "{body}");

    client
        .write_all(b"GET hosts\nColumns: nosuch\nKeepAlive: on\nResponseHeader: fixed16\n\n")
        .unwrap();
    let (status, _) = read_framed(&mut client);
    assert_eq!(status, 404);

    client
        .write_all(b"GET hosts\nFilter: latency > fast\nResponseHeader: fixed16\n\n")
        .unwrap();
    let (status, _) = read_framed(&mut client);
    assert_eq!(status, 400);

    // Without KeepAlive the server closes after the error.
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn plain_error_status_line() {
    let (mut server, _dir, socket) = start(4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.write_all(b"PUT hosts\n\n").unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert!(out.starts_with("400 "), "{out}");
    assert!(out.ends_with('\n'));
    assert_eq!(out.lines().count(), 1);

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn request_terminated_by_end_of_stream() {
    let (mut server, _dir, socket) = start(4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.write_all(b"GET hosts\nColumns: name address\nFilter: name = web02").unwrap();
    client.shutdown(Shutdown::Write).unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert_eq!(out, "name;address\nweb02;10.0.0.2\n");

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn tcp_listener_serves_queries() {
    let config = ServerConfig {
        tcp_listen: Some("127.0.0.1:0".to_string()),
        accept_poll: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let mut server = ServerContext::new(engine(fixture_state()), config);
    server.start().unwrap();
    let address = server.addresses()[0].strip_prefix("tcp:").unwrap().to_string();

    let mut client = TcpStream::connect(address).unwrap();
    client
        .write_all(b"GET hosts\nColumns: name\nOutputFormat: json\nColumnHeaders: off\n\n")
        .unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert_eq!(out, "[[\"web01\"],\n[\"web02\"],\n[\"db01\"]]\n");

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn excess_connections_wait_for_a_free_slot() {
    let (mut server, _dir, socket) = start(1);

    let first = UnixStream::connect(&socket).unwrap();
    wait_for_connections(&server, 1);

    let mut second = UnixStream::connect(&socket).unwrap();
    second.write_all(b"GET hosts\nColumns: name\nLimit: 1\n\n").unwrap();
    second.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut buf = [0u8; 64];
    let err = second.read(&mut buf).unwrap_err();
    assert!(
        matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
        "{err}"
    );

    drop(first);
    second.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut out = String::new();
    second.read_to_string(&mut out).unwrap();
    assert_eq!(out, "name\nweb01\n");

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn status_counts_connections() {
    let (mut server, _dir, socket) = start(4);
    for _ in 0..2 {
        let mut client = UnixStream::connect(&socket).unwrap();
        client.write_all(b"GET hosts\nColumns: name\n\n").unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
    }

    let mut client = UnixStream::connect(&socket).unwrap();
    client
        .write_all(b"GET status\nColumns: connections requests\nColumnHeaders: off\n\n")
        .unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert_eq!(out, "3;2\n");

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn stop_closes_idle_keepalive_clients() {
    let (mut server, _dir, socket) = start(4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client
        .write_all(b"GET hosts\nColumns: name\nKeepAlive: on\nResponseHeader: fixed16\n\n")
        .unwrap();
    let (status, _) = read_framed(&mut client);
    assert_eq!(status, 200);

    server.stop(Duration::from_millis(50)).unwrap();
    assert_eq!(server.open_connections(), 0);
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert!(!socket.exists());
}

/// Ten hosts with fifty services each.
fn large_state() -> CoreState {
    let mut state = CoreState::default();
    for h in 0..10 {
        let mut host = Host::new(format!("host{h:02}"));
        for s in 0..50 {
            host = host.with_service(Service::new(format!("svc{s:02}"), s % 4));
        }
        state.hosts.push(host);
    }
    state
}

#[test]
fn half_closed_client_is_served_over_many_rows() {
    let (mut server, _dir, socket) = start_with(engine(large_state()), 4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"GET services\nStats: state count\n\n").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert_eq!(out, "stats_1\n500\n");

    server.stop(Duration::from_millis(200)).unwrap();
}

#[test]
fn half_closed_client_is_served_metric_columns() {
    let (mut server, _dir, socket) = start(4);
    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client
        .write_all(b"GET hosts\nColumns: name rrddata:m1:load1:-3600:now:60\n")
        .unwrap();
    client.write_all(b"ColumnHeaders: off\n\n").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert_eq!(out, "web01;\nweb02;\ndb01;\n");

    server.stop(Duration::from_millis(200)).unwrap();
}
