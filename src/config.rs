//! Layered configuration for the query server.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Defaults embedded in the binary (`config/default.toml`)
//! 2. `/etc/livequery/config.toml`, if present
//! 3. The file given with `--config`
//! 4. Environment variables, e.g. `LIVEQUERY_SERVER__MAX_CONNECTIONS=16`
//! 5. Command-line flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{LiveError, LiveResult};
use crate::logging::LogFormat;
use crate::metric::{MetricResolverConfig, MetricStoreAddress};
use crate::server::{ConnectionSettings, ServerConfig};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const SYSTEM_CONFIG: &str = "/etc/livequery/config.toml";
const ENV_PREFIX: &str = "LIVEQUERY";

/// Command-line arguments of `livequery-server`.
#[derive(Debug, Default, Parser)]
#[command(version, about = "Live status query server")]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Unix socket to listen on
    #[arg(long)]
    pub unix_socket: Option<PathBuf>,

    /// TCP address to listen on, e.g. 0.0.0.0:6557
    #[arg(long)]
    pub tcp_listen: Option<String>,

    /// Maximum number of concurrently served connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// State snapshot written by the monitoring core
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Base directory of the metric files
    #[arg(long)]
    pub pnp_path: Option<PathBuf>,

    /// Metric caching daemon, unix:<path> or <host>:<port>
    #[arg(long)]
    pub rrdcached: Option<String>,

    /// Log filter, e.g. info or livequery=debug
    #[arg(long, env = "LIVEQUERY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (compact, json)
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default)]
    pub core: CoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub unix_socket: Option<PathBuf>,
    #[serde(default)]
    pub tcp_listen: Option<String>,
    pub backlog: i32,
    pub max_connections: usize,
    pub idle_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub accept_poll_ms: u64,
    pub shutdown_grace_ms: u64,
}

/// `[metrics]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub pnp_path: PathBuf,
    #[serde(default)]
    pub rrdcached: Option<String>,
    #[serde(default = "default_metric_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            pnp_path: PathBuf::new(),
            rrdcached: None,
            timeout_ms: default_metric_timeout_ms(),
        }
    }
}

fn default_metric_timeout_ms() -> u64 {
    5000
}

/// `[core]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreSection {
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Empty strings disable optional settings, so an environment variable can
/// switch off a listener configured in a file.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl LiveConfig {
    /// Loads configuration from all sources.
    pub fn load(args: &Args) -> LiveResult<Self> {
        Self::load_layers(args, Some(Path::new(SYSTEM_CONFIG)))
    }

    fn load_layers(args: &Args, system: Option<&Path>) -> LiveResult<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        if let Some(path) = system {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(path) = &args.unix_socket {
            self.server.unix_socket = Some(path.clone());
        }
        if let Some(address) = &args.tcp_listen {
            self.server.tcp_listen = Some(address.clone());
        }
        if let Some(max) = args.max_connections {
            self.server.max_connections = max;
        }
        if let Some(path) = &args.state_file {
            self.core.state_file = Some(path.clone());
        }
        if let Some(path) = &args.pnp_path {
            self.metrics.pnp_path = path.clone();
        }
        if let Some(address) = &args.rrdcached {
            self.metrics.rrdcached = Some(address.clone());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = args.log_format {
            self.logging.format = format;
        }
    }

    /// Rejects settings the server cannot start with.
    pub fn validate(&self) -> LiveResult<()> {
        let server = &self.server;
        let unix = server.unix_socket.as_ref().filter(|p| !p.as_os_str().is_empty());
        let tcp = non_empty(server.tcp_listen.as_deref());
        if unix.is_none() && tcp.is_none() {
            return Err(LiveError::config(
                "at least one of server.unix_socket and server.tcp_listen is required",
            ));
        }
        if server.max_connections == 0 {
            return Err(LiveError::config("server.max_connections must be positive"));
        }
        if server.backlog <= 0 {
            return Err(LiveError::config("server.backlog must be positive"));
        }
        for (name, value) in [
            ("server.idle_timeout_ms", server.idle_timeout_ms),
            ("server.io_timeout_ms", server.io_timeout_ms),
            ("server.accept_poll_ms", server.accept_poll_ms),
            ("metrics.timeout_ms", self.metrics.timeout_ms),
        ] {
            if value == 0 {
                return Err(LiveError::config(format!("{name} must be positive")));
            }
        }
        self.metric_store()?;
        Ok(())
    }

    fn metric_store(&self) -> LiveResult<Option<MetricStoreAddress>> {
        non_empty(self.metrics.rrdcached.as_deref())
            .map(|address| {
                address
                    .parse()
                    .map_err(|e: String| LiveError::config(format!("metrics.rrdcached: {e}")))
            })
            .transpose()
    }

    /// Listener and connection settings.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        let server = &self.server;
        ServerConfig {
            unix_socket: server
                .unix_socket
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            tcp_listen: non_empty(server.tcp_listen.as_deref()).map(str::to_string),
            backlog: server.backlog,
            max_connections: server.max_connections,
            connection: ConnectionSettings {
                idle_timeout: Duration::from_millis(server.idle_timeout_ms),
                io_timeout: Duration::from_millis(server.io_timeout_ms),
            },
            accept_poll: Duration::from_millis(server.accept_poll_ms),
            shutdown_grace: Duration::from_millis(server.shutdown_grace_ms),
        }
    }

    /// Metric resolver settings.
    pub fn metric_config(&self) -> LiveResult<MetricResolverConfig> {
        Ok(MetricResolverConfig {
            pnp_path: self.metrics.pnp_path.clone(),
            store: self.metric_store()?,
            timeout: Duration::from_millis(self.metrics.timeout_ms),
        })
    }

    #[must_use]
    pub fn state_file(&self) -> Option<&Path> {
        self.core.state_file.as_deref()
    }
}
