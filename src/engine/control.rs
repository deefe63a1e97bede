//! Cancellation checkpoints for a running evaluation.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LiveError, LiveResult};

/// Rows between two peer probes.
pub const PROBE_INTERVAL: usize = 256;

/// Detects that the client of an evaluation went away.
pub trait PeerProbe {
    /// Returns true if the peer is gone. A peer that only shut down its
    /// write side still waits for the response.
    fn peer_closed(&self) -> bool;
}

/// Checked by the engine at every row boundary and before every metric fetch.
#[derive(Default)]
pub struct ExecutionControl<'a> {
    shutdown: Option<&'a AtomicBool>,
    probe: Option<&'a dyn PeerProbe>,
    rows: usize,
}

impl<'a> ExecutionControl<'a> {
    /// A control that never cancels.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Cancels once `flag` is set.
    #[must_use]
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Probes the peer every [`PROBE_INTERVAL`] rows.
    #[must_use]
    pub fn with_probe(mut self, probe: &'a dyn PeerProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Row boundary checkpoint.
    pub fn row(&mut self) -> LiveResult<()> {
        self.check_shutdown()?;
        self.rows += 1;
        if self.rows % PROBE_INTERVAL == 0 {
            self.check_peer()?;
        }
        Ok(())
    }

    /// Checkpoint before a blocking operation such as a metric fetch.
    pub fn before_blocking(&mut self) -> LiveResult<()> {
        self.check_shutdown()?;
        self.check_peer()
    }

    fn check_shutdown(&self) -> LiveResult<()> {
        if self.shutdown.is_some_and(|f| f.load(Ordering::Acquire)) {
            return Err(LiveError::cancelled("server shutting down"));
        }
        Ok(())
    }

    fn check_peer(&self) -> LiveResult<()> {
        if self.probe.is_some_and(|p| p.peer_closed()) {
            return Err(LiveError::cancelled("client closed the connection"));
        }
        Ok(())
    }
}
