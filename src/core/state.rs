//! Shared handle onto the monitoring core's state.
//!
//! Queries take the read side for the duration of one evaluation pass; the
//! core's mutation path takes the write side. A mutation therefore waits for
//! in-flight queries, and queries started during a mutation wait for it to
//! finish, so every query observes a single consistent snapshot.

use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::error::{LiveError, LiveResult};

use super::model::CoreState;

fn lock_err(context: &'static str) -> LiveError {
    LiveError::internal(format!("poisoned lock: {context}"))
}

/// Live state of the monitoring core, guarded by a reader/writer lock.
#[derive(Debug, Default)]
pub struct MonitoringCore {
    state: RwLock<CoreState>,
}

impl MonitoringCore {
    /// Wraps an initial state.
    #[must_use]
    pub fn new(mut state: CoreState) -> Self {
        state.normalize();
        Self {
            state: RwLock::new(state),
        }
    }

    /// Loads a state snapshot written by the monitoring core.
    pub fn from_snapshot_file(path: &Path) -> LiveResult<Self> {
        let state = read_snapshot(path)?;
        info!(
            path = %path.display(),
            hosts = state.hosts.len(),
            services = state.num_services(),
            "loaded core state snapshot"
        );
        Ok(Self::new(state))
    }

    /// Acquires the read side for one query pass.
    pub fn read(&self) -> LiveResult<RwLockReadGuard<'_, CoreState>> {
        self.state.read().map_err(|_| lock_err("core state read"))
    }

    /// Applies a mutation under the write lock.
    ///
    /// Blocks until all in-flight readers have released their guards.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut CoreState) -> T) -> LiveResult<T> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| lock_err("core state write"))?;
        let out = mutate(&mut guard);
        guard.normalize();
        debug!("core state mutated");
        Ok(out)
    }
}

fn read_snapshot(path: &Path) -> LiveResult<CoreState> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        LiveError::config(format!("invalid state snapshot {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::core::model::{Host, Service};

    #[test]
    fn test_update_is_visible_to_new_readers() {
        let core = MonitoringCore::new(CoreState::default());
        core.update(|s| s.hosts.push(Host::new("h1"))).unwrap();
        assert_eq!(core.read().unwrap().hosts.len(), 1);
    }

    #[test]
    fn test_mutation_waits_for_readers() {
        let core = Arc::new(MonitoringCore::new(CoreState::default()));
        let guard = core.read().unwrap();

        let writer_core = Arc::clone(&core);
        let writer = thread::spawn(move || {
            writer_core
                .update(|s| s.hosts.push(Host::new("late")))
                .unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        // The reader still sees the snapshot it started with.
        assert!(guard.hosts.is_empty());
        drop(guard);

        writer.join().unwrap();
        assert_eq!(core.read().unwrap().hosts.len(), 1);
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let mut state = CoreState::default();
        state
            .hosts
            .push(Host::new("db01").with_service(Service::new("Uptime", 0)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&serde_json::to_vec(&state).unwrap()).unwrap();

        let core = MonitoringCore::from_snapshot_file(file.path()).unwrap();
        assert_eq!(core.read().unwrap().num_services(), 1);
        assert_eq!(core.read().unwrap().hosts[0].name, "db01");
    }

    #[test]
    fn test_invalid_snapshot_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        let err = MonitoringCore::from_snapshot_file(file.path()).unwrap_err();
        assert!(matches!(err, LiveError::Config { .. }));
    }
}
