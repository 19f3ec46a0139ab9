use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    DEFAULT_EVICTION_CRON, DEFAULT_POLL_TIMEOUT_SECS, DEFAULT_RATE_INTERVAL_SECS,
    DEFAULT_RETENTION_BUCKETS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use crate::store::MergePolicy;

#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub nozzle_addrs: Vec<String>,
    /// Poll interval and bucket width. Should match the nozzles' own reporting interval.
    pub rate_interval: Duration,
    pub retention_buckets: u32,
    pub merge_policy: MergePolicy,
    pub tls: TlsConfig,
    pub uaa: Option<UaaConfig>,
    pub platform: Option<PlatformConfig>,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub cors_origin: String,
    pub shutdown_timeout_secs: u64,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub insecure_skip_verify: bool,
}

/// Client credentials used to obtain a bearer token for nozzle requests.
#[derive(Clone)]
pub struct UaaConfig {
    pub addr: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Present when running as a platform application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub nozzle_count: usize,
    pub nozzle_app_guid: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub eviction_cron: String,
    pub poll_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            eviction_cron: DEFAULT_EVICTION_CRON.to_string(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("NOZZLE_COUNT must not be 0 when deployed as a platform application")]
    ZeroNozzleCount,
    #[error("NOZZLE_ADDRS must contain exactly 1 address when deployed as a platform application, got {0}")]
    PlatformAddrCount(usize),
    #[error("NOZZLE_APP_GUID cannot be empty when deployed as a platform application")]
    MissingAppGuid,
    #[error("UAA credentials are incomplete: UAA_ADDR needs CLIENT_ID and CLIENT_SECRET")]
    IncompleteUaa,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("nozzle_addrs", &self.nozzle_addrs)
            .field("rate_interval", &self.rate_interval)
            .field("retention_buckets", &self.retention_buckets)
            .field("merge_policy", &self.merge_policy)
            .field("tls", &self.tls)
            .field("uaa", &self.uaa)
            .field("platform", &self.platform)
            .field("log_level", &self.log_level)
            .field("enable_file_logs", &self.enable_file_logs)
            .field("log_dir", &self.log_dir)
            .field("cors_origin", &self.cors_origin)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("worker", &self.worker)
            .finish()
    }
}

impl fmt::Debug for UaaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UaaConfig")
            .field("addr", &self.addr)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***REDACTED***")
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_addrs = env::var("NOZZLE_ADDRS").map_err(|_| ConfigError::Missing("NOZZLE_ADDRS"))?;
        let nozzle_addrs = split_addrs(&raw_addrs);
        if nozzle_addrs.is_empty() {
            return Err(ConfigError::Invalid {
                key: "NOZZLE_ADDRS",
                value: raw_addrs,
            });
        }

        let raw_port = env::var("PORT").map_err(|_| ConfigError::Missing("PORT"))?;
        let port = raw_port.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
            key: "PORT",
            value: raw_port.clone(),
        })?;

        let rate_interval = match env::var("RATE_INTERVAL") {
            Ok(raw) => match parse_duration(&raw) {
                // buckets are unix seconds, so the interval must be whole seconds
                Some(d) if d.as_secs() >= 1 && d.subsec_nanos() == 0 => d,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "RATE_INTERVAL",
                        value: raw,
                    })
                }
            },
            Err(_) => Duration::from_secs(DEFAULT_RATE_INTERVAL_SECS),
        };

        let merge_policy = match env::var("RATE_MERGE_POLICY") {
            Ok(raw) => raw.parse::<MergePolicy>().map_err(|_| ConfigError::Invalid {
                key: "RATE_MERGE_POLICY",
                value: raw.clone(),
            })?,
            Err(_) => MergePolicy::default(),
        };

        let platform = platform_from_env(&nozzle_addrs)?;
        let nozzle_addrs = expand_addresses(
            &nozzle_addrs,
            platform.as_ref().map_or(0, |p| p.nozzle_count),
            platform.is_some(),
        );

        let log_level = env::var("RUST_LOG")
            .or_else(|_| env::var("MIN_LOG_LEVEL"))
            .unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            host: env_or_parse("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port,
            nozzle_addrs,
            rate_interval,
            retention_buckets: env_or_parse("RATE_RETENTION_BUCKETS", DEFAULT_RETENTION_BUCKETS)
                .max(1),
            merge_policy,
            tls: TlsConfig {
                insecure_skip_verify: env_or_bool("SKIP_CERT_VERIFY", false),
            },
            uaa: uaa_from_env()?,
            platform,
            log_level,
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            cors_origin: env_or("CORS_ORIGIN", "*"),
            shutdown_timeout_secs: env_or_parse(
                "SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            ),
            worker: WorkerConfig {
                eviction_cron: env_or("EVICTION_CRON", DEFAULT_EVICTION_CRON),
                poll_timeout_secs: env_or_parse("POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT_SECS),
            },
        })
    }

    /// Span of recent buckets the store keeps.
    pub fn retention(&self) -> Duration {
        self.rate_interval.saturating_mul(self.retention_buckets)
    }

    pub fn is_platform_deployed(&self) -> bool {
        self.platform.is_some()
    }
}

fn platform_from_env(addrs: &[String]) -> Result<Option<PlatformConfig>, ConfigError> {
    let deployed = env::var("VCAP_APPLICATION")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    if !deployed {
        return Ok(None);
    }

    let nozzle_count: usize = env_or_parse("NOZZLE_COUNT", 0);
    if nozzle_count == 0 {
        return Err(ConfigError::ZeroNozzleCount);
    }
    if addrs.len() != 1 {
        return Err(ConfigError::PlatformAddrCount(addrs.len()));
    }
    let nozzle_app_guid = env_or("NOZZLE_APP_GUID", "");
    if nozzle_app_guid.trim().is_empty() {
        return Err(ConfigError::MissingAppGuid);
    }

    Ok(Some(PlatformConfig {
        nozzle_count,
        nozzle_app_guid,
    }))
}

fn uaa_from_env() -> Result<Option<UaaConfig>, ConfigError> {
    let addr = env::var("UAA_ADDR").ok().filter(|v| !v.trim().is_empty());
    let client_id = env::var("CLIENT_ID").ok().filter(|v| !v.trim().is_empty());
    let client_secret = env::var("CLIENT_SECRET").ok().filter(|v| !v.is_empty());

    match (addr, client_id, client_secret) {
        (None, None, None) => Ok(None),
        (Some(addr), Some(client_id), Some(client_secret)) => Ok(Some(UaaConfig {
            addr,
            client_id,
            client_secret,
        })),
        _ => Err(ConfigError::IncompleteUaa),
    }
}

/// On a platform deployment every nozzle instance sits behind one route, so the single
/// address is repeated once per instance and requests are pinned by instance index.
pub fn expand_addresses(addrs: &[String], count: usize, is_platform_deployed: bool) -> Vec<String> {
    if !is_platform_deployed {
        return addrs.to_vec();
    }
    match addrs.first() {
        Some(addr) => vec![addr.clone(); count],
        None => Vec::new(),
    }
}

fn split_addrs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A bare number is seconds; anything else goes through `humantime` (`90s`, `1m 30s`, `2h`).
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
