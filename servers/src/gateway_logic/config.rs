use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_gateway::connections::store::{DEFAULT_COUNTER_KEY, DEFAULT_SHUTDOWN_KEY};
use lib_gateway::{ShutdownSettings, StoreKeys};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "server_gateway.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Broadcast WebSocket gateway with fleet-wide graceful shutdown", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "GATEWAY_HOST", help = "Address to bind for client connections.")]
    pub host: Option<String>,

    #[clap(long, env = "GATEWAY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "GATEWAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REDIS_URL", help = "Redis instance shared by every worker.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "GATEWAY_COUNTER_KEY", help = "Key of the fleet connection counter.")]
    pub counter_key: Option<String>,

    #[clap(long, env = "GATEWAY_SHUTDOWN_KEY", help = "Key of the fleet shutdown flag.")]
    pub shutdown_key: Option<String>,

    #[clap(long, env = "GATEWAY_SHUTDOWN_TIMEOUT_SECONDS", help = "Grace period in seconds before remaining connections are force-closed.")]
    pub shutdown_timeout_seconds: Option<u64>,

    #[clap(long, env = "GATEWAY_NOTIFICATION_INTERVAL_SECONDS", help = "Seconds between two periodic notifications.")]
    pub notification_interval_seconds: Option<u64>,

    #[clap(long, env = "GATEWAY_SHUTDOWN_POLL_INTERVAL_MS", help = "Milliseconds between two reads of the shutdown flag.")]
    pub shutdown_poll_interval_ms: Option<u64>,

    #[clap(long, env = "GATEWAY_DRAIN_POLL_INTERVAL_MS", help = "Milliseconds between two reads of the fleet counter while draining.")]
    pub drain_poll_interval_ms: Option<u64>,

    #[clap(long, env = "GATEWAY_CLOSE_GRACE_MS", help = "Milliseconds a client gets to take the close frame during the final sweep.")]
    pub close_grace_ms: Option<u64>,

    #[clap(long, env = "GATEWAY_REUSE_PORT", help = "Bind with SO_REUSEPORT so several workers share the port.")]
    pub reuse_port: Option<bool>,

    #[clap(long, env = "GATEWAY_RELAY_INBOUND", help = "Relay inbound client text to every local client.")]
    pub relay_inbound: Option<bool>,

    #[clap(long, env = "GATEWAY_CLEAR_STALE_SHUTDOWN", help = "Delete a leftover shutdown flag at startup.")]
    pub clear_stale_shutdown: Option<bool>,

    #[clap(long, env = "GATEWAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "GATEWAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "GATEWAY_LOG_KEEP", help = "Number of log files kept in the log directory.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    fn defaults() -> Config {
        Config {
            host: Some("0.0.0.0".to_string()),
            port: Some(8000),
            redis_url: Some("redis://localhost:6379".to_string()),
            counter_key: Some(DEFAULT_COUNTER_KEY.to_string()),
            shutdown_key: Some(DEFAULT_SHUTDOWN_KEY.to_string()),
            shutdown_timeout_seconds: Some(1800),
            notification_interval_seconds: Some(10),
            shutdown_poll_interval_ms: Some(1000),
            drain_poll_interval_ms: Some(5000),
            close_grace_ms: Some(5000),
            reuse_port: Some(false),
            relay_inbound: Some(true),
            clear_stale_shutdown: Some(true),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_keep: Some(10),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            redis_url: other.redis_url.or(self.redis_url),
            counter_key: other.counter_key.or(self.counter_key),
            shutdown_key: other.shutdown_key.or(self.shutdown_key),
            shutdown_timeout_seconds: other.shutdown_timeout_seconds.or(self.shutdown_timeout_seconds),
            notification_interval_seconds: other.notification_interval_seconds.or(self.notification_interval_seconds),
            shutdown_poll_interval_ms: other.shutdown_poll_interval_ms.or(self.shutdown_poll_interval_ms),
            drain_poll_interval_ms: other.drain_poll_interval_ms.or(self.drain_poll_interval_ms),
            close_grace_ms: other.close_grace_ms.or(self.close_grace_ms),
            reuse_port: other.reuse_port.or(self.reuse_port),
            relay_inbound: other.relay_inbound.or(self.relay_inbound),
            clear_stale_shutdown: other.clear_stale_shutdown.or(self.clear_stale_shutdown),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep: other.log_keep.or(self.log_keep),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }
}

/// Certificate and key for the TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Fully resolved and validated worker configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub addr: SocketAddr,
    pub redis_url: String,
    pub keys: StoreKeys,
    pub shutdown: ShutdownSettings,
    pub notification_interval: Duration,
    pub reuse_port: bool,
    pub relay_inbound: bool,
    pub clear_stale_shutdown: bool,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_keep: usize,
    pub tls: Option<TlsPaths>,
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self> {
        // Every field is Some after merging over the defaults.
        let host = config.host.unwrap_or_default();
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("Invalid bind address: {}", host))?;

        let notification_interval = config.notification_interval_seconds.unwrap_or_default();
        if notification_interval == 0 {
            bail!("notificationIntervalSeconds must be greater than zero");
        }
        let flag_poll = config.shutdown_poll_interval_ms.unwrap_or_default();
        if flag_poll == 0 {
            bail!("shutdownPollIntervalMs must be greater than zero");
        }
        let drain_poll = config.drain_poll_interval_ms.unwrap_or_default();
        if drain_poll == 0 {
            bail!("drainPollIntervalMs must be greater than zero");
        }
        let close_grace = config.close_grace_ms.unwrap_or_default();
        if close_grace == 0 {
            bail!("closeGraceMs must be greater than zero");
        }

        let tls = match (config.tls_cert_path, config.tls_key_path) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            (None, None) => None,
            _ => bail!("TLS needs both a certificate and a key path"),
        };

        Ok(Settings {
            addr: SocketAddr::new(ip, config.port.unwrap_or_default()),
            redis_url: config.redis_url.unwrap_or_default(),
            keys: StoreKeys {
                counter_key: config.counter_key.unwrap_or_else(|| DEFAULT_COUNTER_KEY.to_string()),
                shutdown_key: config.shutdown_key.unwrap_or_else(|| DEFAULT_SHUTDOWN_KEY.to_string()),
            },
            shutdown: ShutdownSettings {
                timeout: Duration::from_secs(config.shutdown_timeout_seconds.unwrap_or_default()),
                flag_poll_interval: Duration::from_millis(flag_poll),
                drain_poll_interval: Duration::from_millis(drain_poll),
                close_grace: Duration::from_millis(close_grace),
            },
            notification_interval: Duration::from_secs(notification_interval),
            reuse_port: config.reuse_port.unwrap_or(false),
            relay_inbound: config.relay_inbound.unwrap_or(true),
            clear_stale_shutdown: config.clear_stale_shutdown.unwrap_or(true),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            log_keep: config.log_keep.unwrap_or(10).max(1),
            tls,
        })
    }
}

/// Reads the JSON config file. A missing file is not an error; a malformed one is.
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(Some(file_config))
}

/// Layers defaults, the config file and `cli` (which already carries environment
/// variables) in that order, then validates the result.
pub fn resolve(cli: Config) -> Result<Settings> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }
    current_config = current_config.merge(cli);

    Settings::try_from(current_config)
}

pub fn load_config() -> Result<Settings> {
    resolve(Config::parse())
}
