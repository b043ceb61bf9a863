//! # Configuration Management
//!
//! Centralized configuration for a `NetworkComms` instance.
//!
//! ## Sections
//! - `listener`: default listen address, connection cap, shutdown bound
//! - `connection`: handshake/confirmation/alive-test timeouts, keep-alive,
//!   receive buffer size, checksum validation and the resend cache
//! - `pipeline`: default serializer, processors and processor options
//! - `dispatch`: handler worker pool size
//! - `logging`: subscriber setup for [`crate::utils::logging::init_logging`]
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables prefixed `NETWORK_COMMS_` via `from_env()`
//! - Direct instantiation with defaults, or `default_with_overrides()`

use crate::core::pipeline::PipelineConfig;
use crate::core::processor::{ProcessorKind, OPTION_COMPRESSION_LEVEL, OPTION_PASSWORD};
use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default port for `start_listening` when no address is configured
pub const DEFAULT_LISTEN_PORT: u16 = 4000;

/// Largest payload retained for checksum-fail resends
pub const RESEND_PACKET_CEILING: usize = 75_000;

const ENV_PREFIX: &str = "NETWORK_COMMS_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Defaults applied to packet types sent without explicit options
    #[serde(default)]
    pub pipeline: PipelineDefaults,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `NETWORK_COMMS_*` environment variables.
    ///
    /// Unparseable values are reported rather than ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_var("LISTEN_ADDRESS") {
            config.listener.address = addr;
        }
        if let Some(val) = env_parse::<usize>("MAX_CONNECTIONS")? {
            config.listener.max_connections = val;
        }
        if let Some(val) = env_parse::<u64>("ESTABLISH_TIMEOUT_MS")? {
            config.connection.establish_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("CONFIRMATION_TIMEOUT_MS")? {
            config.connection.confirmation_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("ALIVE_TEST_TIMEOUT_MS")? {
            config.connection.alive_test_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("KEEPALIVE_INTERVAL_MS")? {
            config.connection.keep_alive_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<usize>("RECEIVE_BUFFER_SIZE")? {
            config.connection.receive_buffer_size = val;
        }
        if let Some(val) = env_parse::<bool>("ENABLE_CHECKSUM")? {
            config.connection.enable_checksum_validation = val;
        }
        if let Some(val) = env_parse::<bool>("IGNORE_UNKNOWN_PACKET_TYPES")? {
            config.connection.ignore_unknown_packet_types = val;
        }
        if let Some(val) = env_parse::<usize>("WORKER_COUNT")? {
            config.dispatch.worker_count = val;
        }
        if let Some(password) = env_var("PASSWORD") {
            config.pipeline.password = Some(password);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.listener.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.pipeline.validate());
        errors.extend(self.dispatch.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{name}: '{raw}'"))
        }),
        None => Ok(None),
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Default listen address (e.g., "0.0.0.0:4000")
    pub address: String,

    /// Maximum number of concurrent connections accepted by listeners
    pub max_connections: usize,

    /// Timeout for graceful shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_LISTEN_PORT}"),
            max_connections: 1000,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:4000')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Per-connection behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Time allowed for the setup handshake
    #[serde(with = "duration_serde")]
    pub establish_timeout: Duration,

    /// Time a sender waits for a receive confirmation
    #[serde(with = "duration_serde")]
    pub confirmation_timeout: Duration,

    /// Time allowed for a liveness probe to be answered
    #[serde(with = "duration_serde")]
    pub alive_test_timeout: Duration,

    /// Idle interval before a keep-alive byte is written; zero disables
    #[serde(with = "duration_serde")]
    pub keep_alive_interval: Duration,

    /// Bytes requested per socket read
    pub receive_buffer_size: usize,

    /// Largest payload accepted from a peer
    pub max_payload_size: usize,

    /// Drop packets with no registered handler instead of logging them as errors
    pub ignore_unknown_packet_types: bool,

    /// Hash payloads on send and verify them on receive
    pub enable_checksum_validation: bool,

    /// Payloads larger than this are never cached for resend
    pub resend_packet_ceiling: usize,

    /// Age after which cached packets are pruned
    #[serde(with = "duration_serde")]
    pub resend_cache_ttl: Duration,

    /// Total bytes the resend cache may hold per connection
    pub resend_cache_max_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            establish_timeout: timeout::ESTABLISH_TIMEOUT,
            confirmation_timeout: timeout::CONFIRMATION_TIMEOUT,
            alive_test_timeout: timeout::ALIVE_TEST_TIMEOUT,
            keep_alive_interval: timeout::KEEPALIVE_INTERVAL,
            receive_buffer_size: 8192,
            max_payload_size: MAX_PAYLOAD_SIZE,
            ignore_unknown_packet_types: false,
            enable_checksum_validation: false,
            resend_packet_ceiling: RESEND_PACKET_CEILING,
            resend_cache_ttl: timeout::RESEND_CACHE_TTL,
            resend_cache_max_bytes: 10 * RESEND_PACKET_CEILING,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.establish_timeout.as_millis() < 100 {
            errors.push("Establish timeout too short (minimum: 100ms)".to_string());
        } else if self.establish_timeout.as_secs() > 300 {
            errors.push("Establish timeout too long (maximum: 300s)".to_string());
        }

        if self.confirmation_timeout.as_millis() < 10 {
            errors.push("Confirmation timeout too short (minimum: 10ms)".to_string());
        }

        if self.alive_test_timeout.as_millis() < 10 {
            errors.push("Alive test timeout too short (minimum: 10ms)".to_string());
        }

        if !self.keep_alive_interval.is_zero() && self.keep_alive_interval.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms, or 0 to disable)".to_string());
        } else if self.keep_alive_interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.receive_buffer_size < 512 {
            errors.push("Receive buffer size too small (minimum: 512 bytes)".to_string());
        } else if self.receive_buffer_size > MAX_PAYLOAD_SIZE {
            errors.push(format!(
                "Receive buffer size too large: {} bytes (maximum: {MAX_PAYLOAD_SIZE})",
                self.receive_buffer_size
            ));
        }

        if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_payload_size
            ));
        }

        if self.enable_checksum_validation {
            if self.resend_packet_ceiling > self.resend_cache_max_bytes {
                errors.push(
                    "Resend packet ceiling cannot be larger than the resend cache size".to_string(),
                );
            }
            if self.resend_cache_ttl.is_zero() {
                errors.push("Resend cache TTL must be greater than 0".to_string());
            }
        }

        errors
    }
}

/// Default pipeline for packet types sent without explicit options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineDefaults {
    pub serializer: SerializationFormat,

    /// Processors applied in order on send
    pub processors: Vec<ProcessorKind>,

    /// Zstd compression level
    pub compression_level: i32,

    /// Shared encryption password, required when encryption is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            serializer: SerializationFormat::Bincode,
            processors: Vec::new(),
            compression_level: crate::utils::compression::DEFAULT_ZSTD_LEVEL,
            password: None,
        }
    }
}

impl PipelineDefaults {
    /// The pipeline applied when a send or handler names no options
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.serializer);
        config.processors = self.processors.clone();
        if self.processors.contains(&ProcessorKind::Zstd) {
            config = config.with_option(OPTION_COMPRESSION_LEVEL, self.compression_level.to_string());
        }
        if let Some(password) = &self.password {
            config = config.with_option(OPTION_PASSWORD, password.clone());
        }
        config
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(-7..=22).contains(&self.compression_level) {
            errors.push(format!(
                "Invalid compression level: {} (valid range: -7 to 22)",
                self.compression_level
            ));
        }

        if self.processors.contains(&ProcessorKind::ChaCha20Poly1305) {
            match &self.password {
                None => errors.push("Encryption processor configured without a password".to_string()),
                Some(pw) if pw.is_empty() => {
                    errors.push("Encryption password cannot be empty".to_string())
                }
                Some(_) => {}
            }
        }

        let mut seen = self.processors.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.processors.len() {
            errors.push("Each processor may appear only once in the default pipeline".to_string());
        }

        errors
    }
}

/// Handler dispatch configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DispatchConfig {
    /// Worker tasks executing handlers; 0 uses the available parallelism
    pub worker_count: usize,
}

impl DispatchConfig {
    /// Worker count with the `0` default resolved
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.worker_count > 1024 {
            errors.push(format!(
                "Worker count too high: {} (maximum: 1024)",
                self.worker_count
            ));
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("network-comms"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Durations as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
