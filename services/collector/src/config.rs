//! Collector configuration loading.
//!
//! TOML is the sole config source (spec.md §1 Non-goals: the *loading*
//! mechanism, CLI/env overrides, are an external collaborator). Default
//! config path: `/etc/logcollectord/collector.toml`.
//!
//! Follows `forwarder::config`'s two-layer pattern: a `Raw*`
//! `#[derive(Deserialize)]` tree with `Option` fields, validated and
//! defaulted into a plain `*Config` tree.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config types (validated, defaulted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub schema_version: u32,
    /// Stamped into `Event::via` by the dispatcher.
    pub hostname: String,
    pub resp: RespConfig,
    pub datagram: DatagramConfig,
    pub dispatcher: DispatcherConfig,
    pub mysql: MysqlConfig,
    pub logtube: LogtubeConfig,
    pub standard_queue: QueueDirConfig,
    pub prior_queue: Option<QueueDirConfig>,
    pub standard_bulk: BulkConfig,
    pub prior_bulk: Option<BulkConfig>,
    pub local_sink: Option<LocalSinkConfig>,
    pub watermark: WatermarkConfig,
    pub stats_http: StatsHttpConfig,
}

#[derive(Debug, Clone)]
pub struct RespConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct DatagramConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub topic_ignores: HashSet<String>,
    pub topic_require_keyword: HashSet<String>,
    pub keyword_ignores: HashSet<String>,
    pub env_mappings: HashMap<String, String>,
    pub topic_mappings: HashMap<String, String>,
    pub priors: HashSet<String>,
    pub hostname: String,
}

#[derive(Debug, Clone, Default)]
pub struct MysqlConfig {
    pub ignore_levels: HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct LogtubeConfig {
    pub default_time_offset: i64,
}

#[derive(Debug, Clone)]
pub struct QueueDirConfig {
    pub name: String,
    pub dir: String,
    pub max_bytes_per_file: u64,
    pub sync_every: u32,
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BulkConfig {
    pub backend_url: String,
    pub batch_size: usize,
    pub batch_timeout_secs: u64,
    pub committers: usize,
    pub ignored_errors: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct LocalSinkConfig {
    pub dir: String,
}

#[derive(Debug, Clone)]
pub struct WatermarkDirConfig {
    pub path: String,
    pub watermark_gb: f64,
}

#[derive(Debug, Clone)]
pub struct WatermarkConfig {
    pub dirs: Vec<WatermarkDirConfig>,
    pub sentinel_path: String,
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StatsHttpConfig {
    pub bind: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    hostname: Option<String>,
    resp: Option<RawRespConfig>,
    datagram: Option<RawDatagramConfig>,
    dispatcher: Option<RawDispatcherConfig>,
    mysql: Option<RawMysqlConfig>,
    logtube: Option<RawLogtubeConfig>,
    queue: Option<RawQueueConfig>,
    bulk: Option<RawBulkGroupConfig>,
    local_sink: Option<RawLocalSinkConfig>,
    watermark: Option<RawWatermarkConfig>,
    stats_http: Option<RawStatsHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRespConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDatagramConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDispatcherConfig {
    topic_ignores: Option<Vec<String>>,
    topic_require_keyword: Option<Vec<String>>,
    keyword_ignores: Option<Vec<String>>,
    env_mappings: Option<HashMap<String, String>>,
    topic_mappings: Option<HashMap<String, String>>,
    priors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawMysqlConfig {
    ignore_levels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawLogtubeConfig {
    default_time_offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawQueueConfig {
    standard: Option<RawQueueDirConfig>,
    prior: Option<RawQueueDirConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawQueueDirConfig {
    dir: Option<String>,
    max_bytes_per_file: Option<u64>,
    sync_every: Option<u32>,
    sync_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawBulkGroupConfig {
    standard: Option<RawBulkConfig>,
    prior: Option<RawBulkConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawBulkConfig {
    backend_url: Option<String>,
    batch_size: Option<usize>,
    batch_timeout_secs: Option<u64>,
    committers: Option<usize>,
    ignored_errors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawLocalSinkConfig {
    dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawWatermarkConfig {
    dirs: Option<Vec<RawWatermarkDirConfig>>,
    sentinel_path: Option<String>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawWatermarkDirConfig {
    path: Option<String>,
    watermark_gb: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawStatsHttpConfig {
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<CollectorConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<CollectorConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/logcollectord/collector.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<CollectorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let hostname = raw
        .hostname
        .ok_or_else(|| ConfigError::MissingField("hostname".to_owned()))?;

    let resp = {
        let r = raw.resp.ok_or_else(|| ConfigError::MissingField("resp".to_owned()))?;
        RespConfig {
            bind: r.bind.unwrap_or_else(|| "0.0.0.0:6400".to_owned()),
        }
    };

    let datagram = {
        let d = raw.datagram.unwrap_or(RawDatagramConfig { bind: None });
        DatagramConfig {
            bind: d.bind.unwrap_or_else(|| "0.0.0.0:6401".to_owned()),
        }
    };

    let raw_dispatcher = raw.dispatcher.unwrap_or_default();
    let dispatcher = DispatcherConfig {
        topic_ignores: raw_dispatcher.topic_ignores.unwrap_or_default().into_iter().collect(),
        topic_require_keyword: raw_dispatcher
            .topic_require_keyword
            .unwrap_or_default()
            .into_iter()
            .collect(),
        keyword_ignores: raw_dispatcher.keyword_ignores.unwrap_or_default().into_iter().collect(),
        env_mappings: raw_dispatcher.env_mappings.unwrap_or_default(),
        topic_mappings: raw_dispatcher.topic_mappings.unwrap_or_default(),
        priors: raw_dispatcher.priors.unwrap_or_default().into_iter().collect(),
        hostname: hostname.clone(),
    };

    let raw_mysql = raw.mysql.unwrap_or_default();
    let mysql = MysqlConfig {
        ignore_levels: raw_mysql
            .ignore_levels
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
    };

    let raw_logtube = raw.logtube.unwrap_or_default();
    let logtube = LogtubeConfig {
        default_time_offset: raw_logtube.default_time_offset.unwrap_or(0),
    };

    let raw_queue = raw.queue.ok_or_else(|| ConfigError::MissingField("queue".to_owned()))?;
    let raw_standard_queue = raw_queue
        .standard
        .ok_or_else(|| ConfigError::MissingField("queue.standard".to_owned()))?;
    let standard_queue = build_queue_dir_config("standard", raw_standard_queue)?;
    let prior_queue = raw_queue
        .prior
        .map(|q| build_queue_dir_config("prior", q))
        .transpose()?;

    let raw_bulk = raw.bulk.ok_or_else(|| ConfigError::MissingField("bulk".to_owned()))?;
    let raw_standard_bulk = raw_bulk
        .standard
        .ok_or_else(|| ConfigError::MissingField("bulk.standard".to_owned()))?;
    let standard_bulk = build_bulk_config(raw_standard_bulk)?;
    let prior_bulk = raw_bulk.prior.map(build_bulk_config).transpose()?;

    if prior_queue.is_some() != prior_bulk.is_some() && !dispatcher.priors.is_empty() {
        return Err(ConfigError::InvalidValue(
            "dispatcher.priors is non-empty but [queue.prior]/[bulk.prior] are not both configured".to_owned(),
        ));
    }

    let local_sink = raw.local_sink.map(|s| -> Result<LocalSinkConfig, ConfigError> {
        Ok(LocalSinkConfig {
            dir: s.dir.ok_or_else(|| ConfigError::MissingField("local_sink.dir".to_owned()))?,
        })
    }).transpose()?;

    let raw_watermark = raw.watermark.unwrap_or_default();
    let watermark = WatermarkConfig {
        dirs: raw_watermark
            .dirs
            .unwrap_or_default()
            .into_iter()
            .map(|d| -> Result<WatermarkDirConfig, ConfigError> {
                Ok(WatermarkDirConfig {
                    path: d.path.ok_or_else(|| ConfigError::MissingField("watermark.dirs[].path".to_owned()))?,
                    watermark_gb: d.watermark_gb.unwrap_or(50.0),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        sentinel_path: raw_watermark
            .sentinel_path
            .unwrap_or_else(|| "/tmp/logtubed.block.txt".to_owned()),
        interval_secs: raw_watermark.interval_secs.unwrap_or(30),
    };

    let stats_http = {
        let s = raw.stats_http.unwrap_or(RawStatsHttpConfig { bind: None });
        StatsHttpConfig {
            bind: s.bind.unwrap_or_else(|| "0.0.0.0:8088".to_owned()),
        }
    };

    Ok(CollectorConfig {
        schema_version,
        hostname,
        resp,
        datagram,
        dispatcher,
        mysql,
        logtube,
        standard_queue,
        prior_queue,
        standard_bulk,
        prior_bulk,
        local_sink,
        watermark,
        stats_http,
    })
}

fn build_queue_dir_config(name: &str, raw: RawQueueDirConfig) -> Result<QueueDirConfig, ConfigError> {
    Ok(QueueDirConfig {
        name: name.to_owned(),
        dir: raw
            .dir
            .ok_or_else(|| ConfigError::MissingField(format!("queue.{name}.dir")))?,
        max_bytes_per_file: raw.max_bytes_per_file.unwrap_or(256 * 1024 * 1024),
        sync_every: raw.sync_every.unwrap_or(100),
        sync_interval_secs: raw.sync_interval_secs.unwrap_or(20),
    })
}

fn build_bulk_config(raw: RawBulkConfig) -> Result<BulkConfig, ConfigError> {
    let mut ignored_errors: HashSet<String> = raw.ignored_errors.unwrap_or_default().into_iter().collect();
    if ignored_errors.is_empty() {
        ignored_errors.insert("closed".to_owned());
    }
    Ok(BulkConfig {
        backend_url: raw
            .backend_url
            .ok_or_else(|| ConfigError::MissingField("bulk.*.backend_url".to_owned()))?,
        batch_size: raw.batch_size.unwrap_or(100),
        batch_timeout_secs: raw.batch_timeout_secs.unwrap_or(3),
        committers: raw.committers.unwrap_or(3),
        ignored_errors,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        schema_version = 1
        hostname = "collector-1"

        [resp]
        bind = "127.0.0.1:0"

        [queue.standard]
        dir = "/tmp/does-not-matter"

        [bulk.standard]
        backend_url = "http://localhost:9200/_bulk"
        "#
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let cfg = load_config_from_str(minimal_toml()).unwrap();
        assert_eq!(cfg.hostname, "collector-1");
        assert_eq!(cfg.datagram.bind, "0.0.0.0:6401");
        assert_eq!(cfg.standard_queue.max_bytes_per_file, 256 * 1024 * 1024);
        assert_eq!(cfg.standard_bulk.batch_size, 100);
        assert!(cfg.standard_bulk.ignored_errors.contains("closed"));
        assert!(cfg.prior_queue.is_none());
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let toml = minimal_toml().replace("schema_version = 1", "schema_version = 2");
        assert!(matches!(load_config_from_str(&toml), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn rejects_missing_required_field() {
        let toml = minimal_toml().replace("hostname = \"collector-1\"", "");
        assert!(matches!(load_config_from_str(&toml), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn rejects_priors_without_prior_queue() {
        let mut toml = minimal_toml().to_owned();
        toml.push_str("\n[dispatcher]\npriors = [\"x-urgent\"]\n");
        assert!(matches!(load_config_from_str(&toml), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn parses_dispatcher_sets_and_mappings() {
        let mut toml = minimal_toml().to_owned();
        toml.push_str(
            "\n[dispatcher]\ntopic_ignores = [\"noisy\"]\n[dispatcher.env_mappings]\nstaging = \"test\"\n",
        );
        let cfg = load_config_from_str(&toml).unwrap();
        assert!(cfg.dispatcher.topic_ignores.contains("noisy"));
        assert_eq!(cfg.dispatcher.env_mappings.get("staging"), Some(&"test".to_owned()));
    }
}
