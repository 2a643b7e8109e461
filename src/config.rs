//! Configuration module for Downtrail.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A variable that is present but malformed is an error, not a silent default.

use std::collections::HashSet;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::db::{HostTarget, ServiceTarget, StatusPolicy, Targets};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("unknown storage backend {0:?} (expected relational or time-series)")]
    UnknownBackend(String),
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("malformed service entry {0:?} (expected name=url)")]
    ServiceEntry(String),
    #[error("duplicate service name {0:?}")]
    DuplicateService(String),
    #[error("illegal host address {0:?}")]
    HostAddress(String),
}

/// Where samples are persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Relational { path: PathBuf },
    TimeSeries { url: String, database: String },
}

/// HTTP method used for the first attempt of a service probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    Get,
}

/// Parameters of one ICMP echo burst.
#[derive(Debug, Clone, PartialEq)]
pub struct PingSettings {
    /// Utility run for each burst.
    pub program: String,
    pub count: u32,
    pub interval: Duration,
    pub echo_timeout: Duration,
    /// Total time recorded when the burst fails outright.
    pub failure_total_time_ms: f64,
}

impl PingSettings {
    /// Upper bound on how long one burst may take.
    pub fn deadline(&self) -> Duration {
        self.interval
            .saturating_add(self.echo_timeout)
            .saturating_mul(self.count)
    }
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            count: 5,
            interval: Duration::from_millis(200),
            echo_timeout: Duration::from_secs(1),
            failure_total_time_ms: 1000.0,
        }
    }
}

/// Monitor configuration, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub backend: BackendConfig,
    pub status_policy: StatusPolicy,
    pub cadence: Duration,
    pub service_timeout: Duration,
    pub service_method: ProbeMethod,
    pub ping: PingSettings,
    pub report_file: PathBuf,
    /// Control surface port; `None` disables it.
    pub http_port: Option<u16>,
    pub targets: Targets,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Relational {
                path: PathBuf::from("downtrail.db"),
            },
            status_policy: StatusPolicy::Exact,
            cadence: Duration::from_secs(2),
            service_timeout: Duration::from_millis(900),
            service_method: ProbeMethod::Head,
            ping: PingSettings::default(),
            report_file: PathBuf::from("downtrail_report.txt"),
            http_port: Some(8080),
            targets: Targets::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `DOWNTRAIL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        let backend = get("DOWNTRAIL_BACKEND").unwrap_or_else(|| "relational".to_string());
        cfg.backend = match backend.trim().to_ascii_lowercase().as_str() {
            "relational" | "sql" | "sqlite" => BackendConfig::Relational {
                path: get("DOWNTRAIL_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("downtrail.db")),
            },
            "time-series" | "timeseries" | "influx" | "influxdb" => BackendConfig::TimeSeries {
                url: get("DOWNTRAIL_INFLUX_URL").unwrap_or_else(|| "http://localhost:8086".to_string()),
                database: get("DOWNTRAIL_INFLUX_DB").unwrap_or_else(|| "endpoints".to_string()),
            },
            _ => return Err(ConfigError::UnknownBackend(backend)),
        };

        if let Some(v) = get("DOWNTRAIL_HEALTHY_STATUS") {
            cfg.status_policy = StatusPolicy::parse(&v).ok_or(ConfigError::Invalid {
                var: "DOWNTRAIL_HEALTHY_STATUS",
                value: v,
            })?;
        }

        if let Some(v) = get("DOWNTRAIL_CADENCE_SECS") {
            cfg.cadence = parse_secs("DOWNTRAIL_CADENCE_SECS", &v)?;
        }
        if let Some(v) = get("DOWNTRAIL_SERVICE_TIMEOUT_SECS") {
            cfg.service_timeout = parse_secs("DOWNTRAIL_SERVICE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("DOWNTRAIL_SERVICE_METHOD") {
            cfg.service_method = match v.trim().to_ascii_uppercase().as_str() {
                "HEAD" => ProbeMethod::Head,
                "GET" => ProbeMethod::Get,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "DOWNTRAIL_SERVICE_METHOD",
                        value: v,
                    })
                }
            };
        }

        if let Some(v) = get("DOWNTRAIL_PING_COUNT") {
            cfg.ping.count = parse_num("DOWNTRAIL_PING_COUNT", &v)?;
            if cfg.ping.count == 0 {
                return Err(ConfigError::NotPositive("DOWNTRAIL_PING_COUNT"));
            }
        }
        if let Some(v) = get("DOWNTRAIL_PING_INTERVAL_SECS") {
            cfg.ping.interval = parse_secs("DOWNTRAIL_PING_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("DOWNTRAIL_PING_ECHO_TIMEOUT_SECS") {
            cfg.ping.echo_timeout = parse_secs("DOWNTRAIL_PING_ECHO_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("DOWNTRAIL_PING_FAILURE_TOTAL_TIME_MS") {
            let ms: f64 = parse_num("DOWNTRAIL_PING_FAILURE_TOTAL_TIME_MS", &v)?;
            // Stored as a NOT NULL REAL and an Influx float field.
            if !ms.is_finite() || ms < 0.0 {
                return Err(ConfigError::Invalid {
                    var: "DOWNTRAIL_PING_FAILURE_TOTAL_TIME_MS",
                    value: v,
                });
            }
            cfg.ping.failure_total_time_ms = ms;
        }
        if let Some(v) = get("DOWNTRAIL_PING_PROGRAM") {
            cfg.ping.program = v.trim().to_string();
        }

        if let Some(v) = get("DOWNTRAIL_REPORT_FILE") {
            cfg.report_file = PathBuf::from(v);
        }

        if let Some(v) = get("DOWNTRAIL_HTTP_PORT") {
            cfg.http_port = match v.trim() {
                "off" | "0" => None,
                port => Some(parse_num("DOWNTRAIL_HTTP_PORT", port)?),
            };
        }

        if let Some(v) = get("DOWNTRAIL_SERVICES") {
            cfg.targets.services = parse_services(&v)?;
        }
        if let Some(v) = get("DOWNTRAIL_HOSTS") {
            cfg.targets.hosts = parse_hosts(&v)?;
        }

        Ok(cfg)
    }
}

fn parse_num<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_num(var, value)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::NotPositive(var));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

/// `name=url,name=url`
fn parse_services(value: &str) -> Result<Vec<ServiceTarget>, ConfigError> {
    let mut seen = HashSet::new();
    let mut services = Vec::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::ServiceEntry(entry.to_string()))?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ServiceEntry(entry.to_string()));
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::DuplicateService(name.to_string()));
        }
        services.push(ServiceTarget {
            name: name.to_string(),
            base_url: url.to_string(),
        });
    }

    Ok(services)
}

/// Comma-separated IP literals.
fn parse_hosts(value: &str) -> Result<Vec<HostTarget>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|addr| {
            addr.parse::<IpAddr>()
                .map(|_| HostTarget { address: addr.to_string() })
                .map_err(|_| ConfigError::HostAddress(addr.to_string()))
        })
        .collect()
}
