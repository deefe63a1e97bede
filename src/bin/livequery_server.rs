//! livequery server
//!
//! Serves live status queries over Unix and TCP sockets.
//!
//! Signals: SIGHUP reloads the state snapshot, SIGTERM and SIGINT shut down.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use livequery::config::{Args, LiveConfig};
use livequery::{
    logging, Catalog, CoreState, LiveResult, MetricResolver, MonitoringCore, QueryEngine,
    ServerContext,
};

fn load_core(state_file: Option<&Path>) -> LiveResult<MonitoringCore> {
    match state_file {
        Some(path) => MonitoringCore::from_snapshot_file(path),
        None => {
            warn!("no state file configured, serving an empty core");
            Ok(MonitoringCore::new(CoreState::default()))
        }
    }
}

fn reload(engine: &QueryEngine, state_file: Option<&Path>) {
    let Some(path) = state_file else {
        info!("reload requested without a state file, nothing to do");
        return;
    };
    match MonitoringCore::from_snapshot_file(path) {
        Ok(core) => match engine.rebind(Arc::new(core)) {
            Ok(()) => info!(path = %path.display(), "state reloaded"),
            Err(e) => error!(error = %e, "failed to bind reloaded state"),
        },
        Err(e) => error!(
            path = %path.display(),
            error = %e,
            "reload failed, keeping current state"
        ),
    }
}

async fn run(config: LiveConfig) -> LiveResult<()> {
    let core = load_core(config.state_file())?;
    let metrics = MetricResolver::new(config.metric_config()?);
    let engine = Arc::new(QueryEngine::new(
        Arc::new(Catalog::new()),
        Arc::new(core),
        metrics,
    ));

    let server_config = config.server_config();
    let grace = server_config.shutdown_grace;
    let mut server = ServerContext::new(Arc::clone(&engine), server_config);
    server.start()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addresses = ?server.addresses(),
        "livequery started"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP");
                reload(&engine, config.state_file());
            }
        }
    }

    info!(grace_ms = grace.as_millis(), "shutting down");
    server.stop(grace)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match LiveConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging.level, config.logging.format) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "livequery failed");
            ExitCode::FAILURE
        }
    }
}
