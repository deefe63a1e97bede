//! Connection server: accepts clients on Unix and TCP sockets and serves each
//! on its own thread.
//!
//! ```text
//! acceptor (one per listener)          connection threads
//!   slot = slots.acquire()  ─────────▶  Connection::serve()
//!   listener.accept()                     drops slot + registration on exit
//! ```
//!
//! Shutdown stops the acceptors, waits for open connections to finish up to
//! a grace period, then force-closes the rest.

mod connection;
mod listener;
mod slots;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::engine::QueryEngine;
use crate::error::{LiveError, LiveResult};

pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use listener::{ClientStream, Listener};
pub use slots::{SlotGuard, SlotPool};

/// Time given to force-closed connections to unwind.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Listener and resource settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub unix_socket: Option<PathBuf>,
    /// TCP address, e.g. `0.0.0.0:6557`.
    pub tcp_listen: Option<String>,
    pub backlog: i32,
    pub max_connections: usize,
    pub connection: ConnectionSettings,
    /// How often acceptors look for new connections and for shutdown.
    pub accept_poll: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            unix_socket: None,
            tcp_listen: None,
            backlog: 128,
            max_connections: 64,
            connection: ConnectionSettings::default(),
            accept_poll: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct Shared {
    engine: Arc<QueryEngine>,
    shutdown: Arc<AtomicBool>,
    slots: SlotPool,
    registry: Mutex<HashMap<u64, ClientStream>>,
    next_id: AtomicU64,
    settings: ConnectionSettings,
    accept_poll: Duration,
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> LiveError {
    LiveError::internal("connection registry lock poisoned")
}

impl Shared {
    fn registry(&self) -> LiveResult<MutexGuard<'_, HashMap<u64, ClientStream>>> {
        self.registry.lock().map_err(lock_err)
    }

    fn open_connections(&self) -> usize {
        self.registry.lock().map_or(0, |r| r.len())
    }
}

/// Keeps a connection in the registry while its thread runs.
struct Registration {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.shared.registry.lock() {
            registry.remove(&self.id);
        }
        self.shared.engine.counters().connection_closed();
    }
}

/// A running (or stopped) query server.
pub struct ServerContext {
    config: ServerConfig,
    shared: Arc<Shared>,
    acceptors: Vec<JoinHandle<()>>,
    addresses: Vec<String>,
}

impl ServerContext {
    #[must_use]
    pub fn new(engine: Arc<QueryEngine>, config: ServerConfig) -> Self {
        let shared = Arc::new(Shared {
            engine,
            shutdown: Arc::new(AtomicBool::new(false)),
            slots: SlotPool::new(config.max_connections),
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            settings: config.connection,
            accept_poll: config.accept_poll,
        });
        Self {
            config,
            shared,
            acceptors: Vec::new(),
            addresses: Vec::new(),
        }
    }

    /// Binds the configured listeners and starts accepting.
    pub fn start(&mut self) -> LiveResult<()> {
        if !self.acceptors.is_empty() {
            return Err(LiveError::internal("server already started"));
        }

        let mut listeners = Vec::new();
        if let Some(path) = &self.config.unix_socket {
            listeners.push(Listener::bind_unix(path, self.config.backlog)?);
        }
        if let Some(address) = &self.config.tcp_listen {
            listeners.push(Listener::bind_tcp(address, self.config.backlog)?);
        }
        if listeners.is_empty() {
            return Err(LiveError::config("neither unix_socket nor tcp_listen is configured"));
        }

        self.shared.shutdown.store(false, Ordering::Release);
        self.addresses.clear();
        for listener in listeners {
            let address = listener.to_string();
            info!(%address, max_connections = self.shared.slots.capacity(), "listening");
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("livequery-accept-{}", self.acceptors.len()))
                .spawn(move || accept_loop(&listener, &shared))?;
            self.acceptors.push(handle);
            self.addresses.push(address);
        }
        Ok(())
    }

    /// Stops accepting, drains open connections for up to `grace`, then
    /// force-closes the rest.
    pub fn stop(&mut self, grace: Duration) -> LiveResult<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.acceptors.drain(..) {
            handle
                .join()
                .map_err(|_| LiveError::internal("acceptor thread panicked"))?;
        }

        let open = self.wait_for_connections(grace);
        if open > 0 {
            let registry = self.shared.registry()?;
            warn!(connections = registry.len(), "force-closing connections");
            for stream in registry.values() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            drop(registry);
            let left = self.wait_for_connections(FORCE_CLOSE_WAIT);
            if left > 0 {
                error!(connections = left, "connections did not terminate");
            }
        }
        info!("server stopped");
        Ok(())
    }

    fn wait_for_connections(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let open = self.shared.open_connections();
            if open == 0 || Instant::now() >= deadline {
                return open;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Addresses the server listens on, e.g. `unix:/run/live` or `tcp:127.0.0.1:6557`.
    #[must_use]
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.shared.engine
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.acceptors.is_empty()
    }

    /// Connections currently being served.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections()
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop(self.config.shutdown_grace) {
                error!(error = %e, "server shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("addresses", &self.addresses)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn accept_loop(listener: &Listener, shared: &Arc<Shared>) {
    let mut saturated = false;
    while !shared.shutdown.load(Ordering::Acquire) {
        let Some(slot) = shared.slots.acquire(shared.accept_poll) else {
            if !saturated {
                let exhausted = LiveError::ResourceExhausted {
                    limit: shared.slots.capacity(),
                };
                debug!(listener = %listener, error = %exhausted, "new connections wait for a slot");
                saturated = true;
            }
            continue;
        };
        saturated = false;
        match listener.accept() {
            Ok(Some(stream)) => spawn_connection(stream, slot, shared),
            Ok(None) => {
                drop(slot);
                thread::sleep(shared.accept_poll);
            }
            Err(e) => {
                drop(slot);
                warn!(listener = %listener, error = %e, "accept failed");
                thread::sleep(shared.accept_poll);
            }
        }
    }
    debug!(listener = %listener, "acceptor stopped");
}

fn spawn_connection(stream: ClientStream, slot: SlotGuard, shared: &Arc<Shared>) {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

    let registered = stream
        .try_clone()
        .map_err(LiveError::from)
        .and_then(|clone| {
            shared.registry()?.insert(id, clone);
            Ok(())
        });
    if let Err(e) = registered {
        warn!(conn = id, error = %e, "failed to register connection");
        return;
    }
    shared.engine.counters().connection_opened();
    let registration = Registration {
        shared: Arc::clone(shared),
        id,
    };

    let connection = match Connection::new(
        id,
        stream,
        Arc::clone(&shared.engine),
        Arc::clone(&shared.shutdown),
        shared.settings,
    ) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(conn = id, error = %e, "failed to set up connection");
            return;
        }
    };

    let spawned = thread::Builder::new()
        .name(format!("livequery-conn-{id}"))
        .spawn(move || {
            let _slot = slot;
            let _registration = registration;
            connection.serve();
        });
    if let Err(e) = spawned {
        error!(conn = id, error = %e, "failed to spawn connection thread");
    }
}
