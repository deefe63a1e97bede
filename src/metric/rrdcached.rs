//! Client for the time-series cache daemon (rrdcached protocol).
//!
//! Every fetch opens its own short-lived connection:
//!
//! ```text
//! > FETCH /var/pnp4nagios/perfdata/web01/CPU_load1.rrd AVERAGE 1700000000 1700003600
//! < 7 Success
//! < FlushVersion: 1
//! < Start: 1700000000
//! < Step: 60
//! < DSCount: 1
//! < DSName: 1
//! < 1700000060: 1.5000000000e+00
//! < 1700000120: nan
//! ```

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::MetricError;
use crate::time::SampleWindow;

use super::samples::{Consolidation, MetricSamples};

/// Upper bound on reply lines accepted from the daemon.
const MAX_REPLY_LINES: usize = 1_000_000;

/// Upper bound on the length of one reply line.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Address of the metric store daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricStoreAddress {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// `host:port` TCP address.
    Tcp(String),
}

impl FromStr for MetricStoreAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty metric store address".to_string());
        }
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        if s.contains(':') {
            return Ok(Self::Tcp(s.to_string()));
        }
        Err(format!("invalid metric store address '{s}', expected unix:<path> or <host>:<port>"))
    }
}

impl fmt::Display for MetricStoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => f.write_str(addr),
        }
    }
}

enum Connection {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Connection {
    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.set_read_timeout(Some(timeout)),
            Self::Tcp(s) => s.set_read_timeout(Some(timeout)),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

/// Reads from a connection until a fixed deadline for the whole reply.
struct DeadlineReader {
    conn: Connection,
    deadline: Instant,
}

impl Read for DeadlineReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "metric fetch deadline passed",
            ));
        }
        self.conn.set_read_timeout(remaining)?;
        self.conn.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

/// Parsed reply of a `FETCH` command: one sample row per time step, one
/// column per data source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReply {
    pub start: i64,
    pub step: u64,
    pub ds_names: Vec<String>,
    pub rows: Vec<(i64, Vec<Option<f64>>)>,
}

impl FetchReply {
    /// Extracts the samples of one data source.
    #[must_use]
    pub fn series(&self, data_source: &str) -> Option<MetricSamples> {
        let idx = self.ds_names.iter().position(|n| n == data_source)?;
        let values = self.rows.iter().map(|(_, row)| row[idx]).collect();
        Some(MetricSamples::new(self.start, self.step, values))
    }
}

/// One-shot client for the metric store daemon.
#[derive(Debug, Clone)]
pub struct RrdcachedClient {
    address: MetricStoreAddress,
    timeout: Duration,
}

impl RrdcachedClient {
    #[must_use]
    pub const fn new(address: MetricStoreAddress, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    #[must_use]
    pub const fn address(&self) -> &MetricStoreAddress {
        &self.address
    }

    /// Fetches one file over a fresh connection.
    ///
    /// The whole round trip is bounded by the client timeout. Returns
    /// `Ok(None)` if the daemon does not know the file.
    pub fn fetch(
        &self,
        path: &Path,
        cf: Consolidation,
        window: &SampleWindow,
    ) -> Result<Option<FetchReply>, MetricError> {
        let deadline = Instant::now() + self.timeout;
        let mut conn = self.connect()?;
        let request = format!(
            "FETCH {} {} {} {}\n",
            path.display(),
            cf.store_name(),
            window.start.timestamp(),
            window.end.timestamp()
        );
        debug!(address = %self.address, request = request.trim_end(), "metric store request");

        conn.write_all(request.as_bytes())
            .and_then(|()| conn.flush())
            .map_err(|e| self.io_error(&e))?;

        let reader = DeadlineReader { conn, deadline };
        parse_fetch_reply(BufReader::new(reader)).map_err(|e| match e {
            ReplyError::Io(e) => self.io_error(&e),
            ReplyError::Malformed(reason) => MetricError::MalformedReply { reason },
        })
    }

    fn connect(&self) -> Result<Connection, MetricError> {
        let conn = match &self.address {
            MetricStoreAddress::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(|e| self.unreachable(&e))?;
                stream
                    .set_read_timeout(Some(self.timeout))
                    .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
                    .map_err(|e| self.unreachable(&e))?;
                Connection::Unix(stream)
            }
            MetricStoreAddress::Tcp(addr) => {
                let sock_addr = addr
                    .to_socket_addrs()
                    .map_err(|e| self.unreachable(&e))?
                    .next()
                    .ok_or_else(|| MetricError::Unreachable {
                        address: addr.clone(),
                        reason: "address did not resolve".to_string(),
                    })?;
                let stream = TcpStream::connect_timeout(&sock_addr, self.timeout)
                    .map_err(|e| self.io_error(&e))?;
                stream
                    .set_read_timeout(Some(self.timeout))
                    .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
                    .map_err(|e| self.unreachable(&e))?;
                Connection::Tcp(stream)
            }
        };
        Ok(conn)
    }

    fn unreachable(&self, err: &io::Error) -> MetricError {
        MetricError::Unreachable {
            address: self.address.to_string(),
            reason: err.to_string(),
        }
    }

    fn io_error(&self, err: &io::Error) -> MetricError {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => MetricError::Timeout {
                duration_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            },
            _ => self.unreachable(err),
        }
    }
}

/// Failure while reading a reply.
#[derive(Debug)]
pub enum ReplyError {
    Io(io::Error),
    Malformed(String),
}

impl From<io::Error> for ReplyError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

fn malformed(reason: impl Into<String>) -> ReplyError {
    ReplyError::Malformed(reason.into())
}

fn read_line(reader: &mut impl BufRead) -> Result<String, ReplyError> {
    let mut line = String::new();
    let read = (&mut *reader).take(MAX_LINE_BYTES + 1).read_line(&mut line)?;
    if read == 0 {
        return Err(malformed("connection closed mid-reply"));
    }
    let too_long = u64::try_from(line.len()).map_or(true, |len| len > MAX_LINE_BYTES);
    if too_long && !line.ends_with('\n') {
        return Err(malformed(format!("reply line exceeds {MAX_LINE_BYTES} bytes")));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_sample(token: &str) -> Result<Option<f64>, ReplyError> {
    let v: f64 = token
        .parse()
        .map_err(|_| malformed(format!("invalid sample '{token}'")))?;
    Ok((!v.is_nan()).then_some(v))
}

/// Parses a `FETCH` reply.
///
/// A negative status carrying "No such file" means the series is absent and
/// yields `Ok(None)`; any other negative status is an error.
pub fn parse_fetch_reply(mut reader: impl BufRead) -> Result<Option<FetchReply>, ReplyError> {
    let status_line = read_line(&mut reader)?;
    let (count, message) = status_line
        .split_once(' ')
        .unwrap_or((status_line.as_str(), ""));
    let count: i64 = count
        .parse()
        .map_err(|_| malformed(format!("invalid status line '{status_line}'")))?;
    if count < 0 {
        if message.contains("No such file") {
            return Ok(None);
        }
        return Err(malformed(format!("daemon error: {message}")));
    }
    let count = usize::try_from(count).map_err(|_| malformed("invalid line count"))?;
    if count > MAX_REPLY_LINES {
        return Err(malformed(format!("reply announces {count} lines")));
    }

    let mut start = None;
    let mut step = None;
    let mut ds_count = None;
    let mut ds_names = Vec::new();
    let mut rows = Vec::new();

    for _ in 0..count {
        let line = read_line(&mut reader)?;
        let Some((key, rest)) = line.split_once(':') else {
            return Err(malformed(format!("unexpected line '{line}'")));
        };
        let rest = rest.trim();
        match key {
            "FlushVersion" => {}
            "Start" => start = Some(rest.parse::<i64>().map_err(|_| malformed("invalid Start"))?),
            "Step" => step = Some(rest.parse::<u64>().map_err(|_| malformed("invalid Step"))?),
            "DSCount" => {
                ds_count = Some(rest.parse::<usize>().map_err(|_| malformed("invalid DSCount"))?);
            }
            "DSName" => ds_names = rest.split_whitespace().map(str::to_string).collect(),
            ts => {
                let ts: i64 = ts
                    .parse()
                    .map_err(|_| malformed(format!("unexpected header '{ts}'")))?;
                let values = rest
                    .split_whitespace()
                    .map(parse_sample)
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push((ts, values));
            }
        }
    }

    let start = start.ok_or_else(|| malformed("missing Start"))?;
    let step = step.ok_or_else(|| malformed("missing Step"))?;
    let width = ds_count.unwrap_or(ds_names.len());
    if ds_names.len() != width {
        return Err(malformed(format!(
            "DSCount {width} does not match {} names",
            ds_names.len()
        )));
    }
    if let Some((ts, row)) = rows.iter().find(|(_, row)| row.len() != width) {
        return Err(malformed(format!(
            "row {ts} has {} values, expected {width}",
            row.len()
        )));
    }

    Ok(Some(FetchReply {
        start,
        step,
        ds_names,
        rows,
    }))
}
