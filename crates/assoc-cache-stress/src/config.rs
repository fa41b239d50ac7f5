use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use assoc_cache::StoreConfig;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the stresstest.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "stresstest".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// One group of threads hammering a shared set of owners and kinds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Workload {
    /// Shown in the report.
    pub name: String,
    /// Number of OS threads running operations.
    pub threads: usize,
    /// Number of owner objects.
    pub owners: usize,
    /// Number of cache kinds, each of which is used with every owner.
    pub kinds: usize,
    /// Share of operations that invalidate a value.
    pub remove_ratio: f64,
    /// Share of operations that store a value directly.
    pub put_ratio: f64,
    /// How long a single computation takes.
    #[serde(with = "humantime_serde")]
    pub compute_cost: Duration,
}

impl Default for Workload {
    fn default() -> Self {
        Workload {
            name: "default".into(),
            threads: 4,
            owners: 16,
            kinds: 8,
            remove_ratio: 0.01,
            put_ratio: 0.0,
            compute_cost: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,
    pub metrics: Metrics,
    /// Sizing of the backing store of every owner.
    pub store: StoreConfig,
    pub workloads: Vec<Workload>,
}

impl Config {
    pub fn get(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).context("failed to open config file")?;
        let config: Config =
            serde_yaml::from_reader(file).context("failed to parse config YAML")?;
        config.store.validate().context("invalid store config")?;
        Ok(config)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
