//! Metric resolver: maps rows to files of the time-series store and fetches
//! their samples through the store's caching daemon.
//!
//! Resolution happens outside the core's read guard. While scanning, the
//! engine only records a [`MetricRequest`] per cell; the request owns
//! everything needed to fetch later.

mod rrdcached;
mod samples;

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::catalog::Row;
use crate::error::MetricError;
use crate::time::SampleWindow;
use crate::value::Value;

pub use rrdcached::{parse_fetch_reply, FetchReply, MetricStoreAddress, ReplyError, RrdcachedClient};
pub use samples::{Consolidation, MetricSamples};

/// Data source name used by the performance data files.
pub const DEFAULT_DATA_SOURCE: &str = "1";

/// Arguments of an `rrddata:` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricColumnSpec {
    /// Client-chosen label of the column.
    pub alias: String,
    pub metric: String,
    pub cf: Consolidation,
    /// Window bounds as given: `now`, `-N` or unix seconds.
    pub start: String,
    pub end: String,
    /// Requested step in seconds.
    pub resolution: u64,
    pub max_entries: Option<usize>,
}

impl MetricColumnSpec {
    /// Parses `<alias>:<metric>[.<cf>]:<start>:<end>:<resolution>[:<max_entries>]`.
    pub fn parse(args: &str) -> Result<Self, String> {
        let parts: Vec<&str> = args.split(':').collect();
        if !(5..=6).contains(&parts.len()) {
            return Err(format!(
                "expected <alias>:<metric>[.<cf>]:<start>:<end>:<resolution>[:<max_entries>], \
                 got '{args}'"
            ));
        }

        let alias = parts[0].to_string();
        let (metric, cf) = split_consolidation(parts[1])?;
        if metric.is_empty() {
            return Err("empty metric name".to_string());
        }

        let (start, end) = (parts[2].to_string(), parts[3].to_string());
        if SampleWindow::parse(&start, &end, Utc::now()).is_none() {
            return Err(format!("invalid time window '{start}' to '{end}'"));
        }

        let resolution: u64 = parts[4]
            .parse()
            .map_err(|_| format!("invalid resolution '{}'", parts[4]))?;
        if resolution == 0 {
            return Err("resolution must be positive".to_string());
        }

        let max_entries = parts
            .get(5)
            .map(|s| s.parse::<usize>().map_err(|_| format!("invalid max_entries '{s}'")))
            .transpose()?;

        Ok(Self {
            alias,
            metric: metric.to_string(),
            cf,
            start,
            end,
            resolution,
            max_entries,
        })
    }

    /// The sample window relative to `now`.
    #[must_use]
    pub fn window(&self, now: chrono::DateTime<Utc>) -> Option<SampleWindow> {
        SampleWindow::parse(&self.start, &self.end, now)
    }
}

fn split_consolidation(token: &str) -> Result<(&str, Consolidation), String> {
    match token.rsplit_once('.') {
        Some((metric, cf)) => match cf.parse::<Consolidation>() {
            Ok(cf) => Ok((metric, cf)),
            // Dots are legal in metric names.
            Err(_) if cf.chars().any(|c| c.is_ascii_digit()) => {
                Ok((token, Consolidation::default()))
            }
            Err(e) => Err(e),
        },
        None => Ok((token, Consolidation::default())),
    }
}

/// Where the samples of one metric live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLocation {
    pub path: PathBuf,
    pub data_source: String,
}

/// A metric cell awaiting resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRequest {
    /// `None` if the row has no metric files (e.g. not a host or service).
    pub location: Option<MetricLocation>,
    pub spec: MetricColumnSpec,
}

/// Replaces characters that cannot appear in metric file names.
#[must_use]
pub fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

/// Extracts metric labels from a performance data string.
///
/// Labels containing spaces are single-quoted; `''` inside quotes is a
/// literal quote.
#[must_use]
pub fn perf_data_metric_names(perf_data: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = perf_data.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut label = String::new();
        if first == '\'' {
            chars.next();
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.next_if_eq(&'\'').is_some() {
                        label.push('\'');
                    } else {
                        break;
                    }
                } else {
                    label.push(c);
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
                label.push(c);
            }
        }

        let has_value = chars.next_if_eq(&'=').is_some();
        // Skip the rest of the token.
        while chars.next_if(|c| !c.is_whitespace()).is_some() {}

        if has_value && !label.is_empty() {
            names.push(label);
        }
    }
    names
}

/// Metric resolver settings.
#[derive(Debug, Clone)]
pub struct MetricResolverConfig {
    /// Base directory of the metric files.
    pub pnp_path: PathBuf,
    /// Caching daemon address; fetches fail with `NotConfigured` without one.
    pub store: Option<MetricStoreAddress>,
    /// Connect, read and write timeout of one fetch.
    pub timeout: Duration,
}

impl Default for MetricResolverConfig {
    fn default() -> Self {
        Self {
            pnp_path: PathBuf::new(),
            store: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Resolves metric cells against the store.
#[derive(Debug, Clone)]
pub struct MetricResolver {
    pnp_path: PathBuf,
    client: Option<RrdcachedClient>,
}

impl MetricResolver {
    #[must_use]
    pub fn new(config: MetricResolverConfig) -> Self {
        let client = config
            .store
            .map(|address| RrdcachedClient::new(address, config.timeout));
        Self {
            pnp_path: config.pnp_path,
            client,
        }
    }

    /// A resolver with no metric files; every cell resolves to no data.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(MetricResolverConfig::default())
    }

    #[must_use]
    pub fn pnp_path(&self) -> &Path {
        &self.pnp_path
    }

    /// Maps a host or service row to its metric file.
    #[must_use]
    pub fn locate(&self, row: &Row<'_>, metric: &str) -> Option<MetricLocation> {
        if self.pnp_path.as_os_str().is_empty() {
            return None;
        }
        let host = row.host()?;
        // The host directory is taken verbatim; only a single plain component is accepted.
        let mut components = Path::new(&host.name).components();
        let (Some(Component::Normal(host_dir)), None) = (components.next(), components.next())
        else {
            return None;
        };
        let owner = row
            .service()
            .map_or("_HOST_", |service| service.description.as_str());
        let file = sanitize_component(&format!("{owner}_{metric}.rrd"));
        Some(MetricLocation {
            path: self.pnp_path.join(host_dir).join(file),
            data_source: DEFAULT_DATA_SOURCE.to_string(),
        })
    }

    /// Fetches the raw samples of one location.
    ///
    /// A missing file or data source is `Ok(None)`.
    pub fn fetch(
        &self,
        location: &MetricLocation,
        cf: Consolidation,
        window: &SampleWindow,
    ) -> Result<Option<MetricSamples>, MetricError> {
        if !location.path.exists() {
            debug!(path = %location.path.display(), "metric file absent");
            return Ok(None);
        }
        let client = self.client.as_ref().ok_or(MetricError::NotConfigured)?;
        let reply = client.fetch(&location.path, cf, window)?;
        Ok(reply.and_then(|r| r.series(&location.data_source)))
    }

    /// Resolves one cell. Exactly one fetch attempt is made.
    #[must_use]
    pub fn resolve(&self, request: &MetricRequest) -> Value {
        let Some(location) = &request.location else {
            return Value::Null;
        };
        let spec = &request.spec;
        let Some(window) = spec.window(Utc::now()) else {
            return Value::Null;
        };

        match self.fetch(location, spec.cf, &window) {
            Ok(Some(samples)) => {
                let samples = samples.with_resolution(spec.resolution, spec.cf);
                let samples = match spec.max_entries {
                    Some(max) => samples.limit_entries(max, spec.cf),
                    None => samples,
                };
                Value::Series(samples)
            }
            Ok(None) => Value::Null,
            Err(e) => {
                warn!(
                    path = %location.path.display(),
                    metric = %spec.metric,
                    error = %e,
                    "metric fetch failed"
                );
                Value::Unavailable(e.to_string())
            }
        }
    }
}

impl Default for MetricResolver {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Host, Service};

    #[test]
    fn test_parse_spec() {
        let spec = MetricColumnSpec::parse("m1:load1.max:-3600:now:60:100").unwrap();
        assert_eq!(spec.alias, "m1");
        assert_eq!(spec.metric, "load1");
        assert_eq!(spec.cf, Consolidation::Max);
        assert_eq!(spec.resolution, 60);
        assert_eq!(spec.max_entries, Some(100));

        let spec = MetricColumnSpec::parse("m:rta:1000:2000:300").unwrap();
        assert_eq!(spec.cf, Consolidation::Average);
        assert_eq!(spec.max_entries, None);
    }

    #[test]
    fn test_parse_spec_dotted_metric() {
        let spec = MetricColumnSpec::parse("m:fs_/var.1:-60:now:60").unwrap();
        assert_eq!(spec.metric, "fs_/var.1");
    }

    #[test]
    fn test_parse_spec_errors() {
        assert!(MetricColumnSpec::parse("m:load1:-3600:now").is_err());
        assert!(MetricColumnSpec::parse("m:load1.last:-3600:now:60").is_err());
        assert!(MetricColumnSpec::parse("m:load1:now:-3600:60").is_err());
        assert!(MetricColumnSpec::parse("m:load1:-3600:now:0").is_err());
        assert!(MetricColumnSpec::parse("m:load1:-3600:now:60:x").is_err());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_component("fs /var:x\\y"), "fs__var_x_y");
    }

    #[test]
    fn test_locate() {
        let resolver = MetricResolver::new(MetricResolverConfig {
            pnp_path: PathBuf::from("/pnp"),
            ..MetricResolverConfig::default()
        });
        let host = Host::new("web01");
        let service = Service::new("CPU load", 0);

        let loc = resolver.locate(&Row::Host(&host), "rta").unwrap();
        assert_eq!(loc.path, PathBuf::from("/pnp/web01/_HOST__rta.rrd"));
        assert_eq!(loc.data_source, "1");

        let row = Row::Service {
            host: &host,
            service: &service,
        };
        let loc = resolver.locate(&row, "load1").unwrap();
        assert_eq!(loc.path, PathBuf::from("/pnp/web01/CPU_load_load1.rrd"));
    }

    #[test]
    fn test_locate_keeps_host_directory_verbatim() {
        let resolver = MetricResolver::new(MetricResolverConfig {
            pnp_path: PathBuf::from("/pnp"),
            ..MetricResolverConfig::default()
        });
        let host = Host::new("web 01:east");
        let service = Service::new("fs /var", 0);
        let row = Row::Service {
            host: &host,
            service: &service,
        };
        let loc = resolver.locate(&row, "used:pct").unwrap();
        assert_eq!(loc.path, PathBuf::from("/pnp/web 01:east/fs__var_used_pct.rrd"));

        for name in ["..", "a/b", "/etc", ""] {
            let host = Host::new(name);
            assert!(resolver.locate(&Row::Host(&host), "rta").is_none(), "{name}");
        }
    }

    #[test]
    fn test_disabled_resolver_yields_no_data() {
        let resolver = MetricResolver::disabled();
        let host = Host::new("web01");
        assert!(resolver.locate(&Row::Host(&host), "rta").is_none());

        let request = MetricRequest {
            location: None,
            spec: MetricColumnSpec::parse("m:rta:-60:now:60").unwrap(),
        };
        assert_eq!(resolver.resolve(&request), Value::Null);
    }

    #[test]
    fn test_absent_file_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MetricResolver::new(MetricResolverConfig {
            pnp_path: dir.path().to_path_buf(),
            store: Some(MetricStoreAddress::Unix(dir.path().join("none.sock"))),
            timeout: Duration::from_millis(100),
        });
        let host = Host::new("h");
        let request = MetricRequest {
            location: resolver.locate(&Row::Host(&host), "rta"),
            spec: MetricColumnSpec::parse("m:rta:-60:now:60").unwrap(),
        };
        assert_eq!(resolver.resolve(&request), Value::Null);
    }

    #[test]
    fn test_unreachable_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("h")).unwrap();
        std::fs::write(dir.path().join("h/_HOST__rta.rrd"), b"").unwrap();
        let resolver = MetricResolver::new(MetricResolverConfig {
            pnp_path: dir.path().to_path_buf(),
            store: Some(MetricStoreAddress::Unix(dir.path().join("none.sock"))),
            timeout: Duration::from_millis(100),
        });
        let host = Host::new("h");
        let request = MetricRequest {
            location: resolver.locate(&Row::Host(&host), "rta"),
            spec: MetricColumnSpec::parse("m:rta:-60:now:60").unwrap(),
        };
        assert!(resolver.resolve(&request).is_unavailable());
    }

    #[test]
    fn test_perf_data_names() {
        assert_eq!(
            perf_data_metric_names("rta=0.5ms;200;500;0; pl=0%;80;100;;"),
            vec!["rta", "pl"]
        );
        assert_eq!(
            perf_data_metric_names("'used space'=12GB 'it''s'=1 broken"),
            vec!["used space", "it's"]
        );
        assert!(perf_data_metric_names("").is_empty());
    }
}
