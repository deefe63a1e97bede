//! One client connection: read a request block, execute, write the response,
//! then wait for the next request or close.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info_span, trace, warn};
use uuid::Uuid;

use crate::engine::{ExecutionControl, PeerProbe, QueryEngine};
use crate::error::{LiveError, LiveResult, ProtocolError, STATUS_INTERNAL, STATUS_TOO_LARGE};
use crate::query::{parse_request, prescan, MAX_REQUEST_BYTES, MAX_REQUEST_LINES};
use crate::response::{render_error, render_response};

use super::listener::ClientStream;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    AwaitingRequest,
    ReadingQueryBlock,
    Executing,
    WritingResponse,
    Closed,
}

impl ConnectionState {
    /// Returns true if `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingRequest, Self::ReadingQueryBlock | Self::Closed)
                | (Self::ReadingQueryBlock, Self::Executing | Self::WritingResponse | Self::Closed)
                | (Self::Executing, Self::WritingResponse | Self::Closed)
                | (Self::WritingResponse, Self::AwaitingRequest | Self::Closed)
        )
    }
}

/// Per-connection timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Read timeout while waiting for the first line of a request.
    pub idle_timeout: Duration,
    /// Read timeout inside a request block and write timeout for responses.
    pub io_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            io_timeout: Duration::from_secs(10),
        }
    }
}

enum RequestBlock {
    Lines(Vec<String>),
    /// The client closed the connection or went idle.
    Eof,
    /// The block exceeded a limit; holds what was read so far.
    TooLarge { lines: Vec<String>, error: ProtocolError },
}

/// A served client connection.
pub struct Connection {
    id: u64,
    reader: BufReader<ClientStream>,
    writer: ClientStream,
    engine: Arc<QueryEngine>,
    shutdown: Arc<AtomicBool>,
    settings: ConnectionSettings,
    state: ConnectionState,
}

impl Connection {
    pub fn new(
        id: u64,
        stream: ClientStream,
        engine: Arc<QueryEngine>,
        shutdown: Arc<AtomicBool>,
        settings: ConnectionSettings,
    ) -> io::Result<Self> {
        stream.set_write_timeout(Some(settings.io_timeout))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            id,
            reader,
            writer: stream,
            engine,
            shutdown,
            settings,
            state: ConnectionState::AwaitingRequest,
        })
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid connection transition {:?} -> {next:?}",
            self.state
        );
        trace!(conn = self.id, from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    /// Serves requests until the client leaves, a request ends the
    /// connection, or the server shuts down.
    pub fn serve(mut self) {
        debug!(conn = self.id, peer = %self.writer.peer(), "connection opened");
        loop {
            let keep_alive = match self.read_request() {
                Ok(RequestBlock::Eof) => false,
                Ok(RequestBlock::TooLarge { lines, error }) => {
                    warn!(conn = self.id, %error, "request rejected");
                    let header = prescan(&lines).response_header;
                    let response = render_error(STATUS_TOO_LARGE, &error.to_string(), header);
                    self.transition(ConnectionState::WritingResponse);
                    if let Err(e) = self.write_response(&response) {
                        debug!(conn = self.id, error = %e, "failed to write error response");
                    }
                    false
                }
                Ok(RequestBlock::Lines(lines)) => match self.handle(&lines) {
                    Ok(keep_alive) => keep_alive,
                    Err(e) if e.is_cancelled() => {
                        debug!(conn = self.id, reason = %e, "evaluation cancelled");
                        false
                    }
                    Err(e) => {
                        debug!(conn = self.id, error = %e, "connection error");
                        false
                    }
                },
                Err(e) => {
                    debug!(conn = self.id, error = %e, "read failed");
                    false
                }
            };

            if !keep_alive || self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.transition(ConnectionState::AwaitingRequest);
        }

        self.transition(ConnectionState::Closed);
        let _ = self.writer.shutdown(Shutdown::Both);
        debug!(conn = self.id, "connection closed");
    }

    /// Reads one request block: lines up to a blank line or end of stream.
    fn read_request(&mut self) -> io::Result<RequestBlock> {
        self.writer.set_read_timeout(Some(self.settings.idle_timeout))?;

        let mut lines = Vec::new();
        let mut total = 0usize;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let remaining =
                u64::try_from(MAX_REQUEST_BYTES.saturating_sub(total) + 1).unwrap_or(u64::MAX);
            let read = match (&mut self.reader).take(remaining).read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e)
                    if lines.is_empty()
                        && matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) =>
                {
                    debug!(conn = self.id, "idle timeout");
                    return Ok(RequestBlock::Eof);
                }
                Err(e) => return Err(e),
            };
            if read == 0 {
                return Ok(if lines.is_empty() {
                    RequestBlock::Eof
                } else {
                    RequestBlock::Lines(lines)
                });
            }

            let blank = buf.iter().all(|b| matches!(b, b'\n' | b'\r'));
            if self.state == ConnectionState::AwaitingRequest && !blank {
                self.transition(ConnectionState::ReadingQueryBlock);
                self.writer.set_read_timeout(Some(self.settings.io_timeout))?;
            }

            total += read;
            if total > MAX_REQUEST_BYTES {
                return Ok(RequestBlock::TooLarge {
                    lines,
                    error: ProtocolError::RequestTooLarge {
                        limit: MAX_REQUEST_BYTES,
                        unit: "bytes",
                    },
                });
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if lines.is_empty() {
                    // Stray newlines between requests.
                    continue;
                }
                return Ok(RequestBlock::Lines(lines));
            }

            lines.push(line.to_string());
            if lines.len() > MAX_REQUEST_LINES {
                return Ok(RequestBlock::TooLarge {
                    lines,
                    error: ProtocolError::RequestTooLarge {
                        limit: MAX_REQUEST_LINES,
                        unit: "lines",
                    },
                });
            }
        }
    }

    /// Executes one request and writes the response. Returns whether the
    /// connection stays open.
    fn handle(&mut self, lines: &[String]) -> LiveResult<bool> {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", id = %request_id, conn = self.id);
        let _entered = span.enter();

        let flags = prescan(lines);
        let query = match parse_request(lines, self.engine.catalog()) {
            Ok(query) => query,
            Err(e) => {
                warn!(line = e.line_number, error = %e, "request rejected");
                let response = render_error(e.status_code(), &e.to_string(), flags.response_header);
                self.transition(ConnectionState::WritingResponse);
                self.write_response(&response)?;
                self.engine.counters().request_served();
                return Ok(flags.keep_alive);
            }
        };

        self.transition(ConnectionState::Executing);
        debug!(table = query.table.name(), stats = query.is_stats(), "executing");
        let result = {
            let probe: &dyn PeerProbe = &self.writer;
            let mut control = ExecutionControl::unbounded()
                .with_shutdown(&self.shutdown)
                .with_probe(probe);
            self.engine.execute(&query, &mut control)
        };

        let (response, keep_alive) = match result {
            Ok(result) => (render_response(&result, &query.output), query.keep_alive),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(error = %e, "evaluation failed");
                (
                    render_error(STATUS_INTERNAL, &e.to_string(), query.output.response_header),
                    false,
                )
            }
        };

        self.transition(ConnectionState::WritingResponse);
        self.write_response(&response)?;
        self.engine.counters().request_served();
        Ok(keep_alive)
    }

    fn write_response(&mut self, response: &[u8]) -> LiveResult<()> {
        self.writer.write_all(response).map_err(LiveError::from)?;
        self.writer.flush()?;
        Ok(())
    }
}
