//! # Configuration Management
//!
//! Centralized configuration for the packet pipeline.
//!
//! This module provides structured configuration for the handler chain, each built-in
//! component, the DDoS severity ladder and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - Handshake secrets rotate every 15s ± 5s by default, bounding cookie replay to 40s
//! - The stateless handshake must be the outermost component so raw handshake traffic is
//!   inspected before any decryption is attempted
//! - Encryption keys are given as 64 hex characters and validated at load time

use crate::error::{HandlerError, Result};
use crate::utils::compression::CompressionKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default maximum datagram size handed to the socket, in bits (1024 bytes)
pub const DEFAULT_MAX_PACKET_BITS: u32 = 1024 * 8;

/// Smallest packet size the pipeline will accept, in bits
pub const MIN_MAX_PACKET_BITS: u32 = 576 * 8;

/// Default cap on outgoing packets held while the handshake completes
pub const DEFAULT_MAX_BUFFERED_PACKETS: usize = 256;

/// AES-256 key length in bytes
pub const ENCRYPTION_KEY_BYTES: usize = 32;

/// Main pipeline configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PipelineConfig {
    /// Chain layout and packet sizing
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Stateless handshake timers
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Reliability resend timing
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// AES encryption settings
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Compression settings
    #[serde(default)]
    pub compression: CompressionConfig,

    /// DDoS detection ladder
    #[serde(default)]
    pub ddos: DdosConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| HandlerError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| HandlerError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| HandlerError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(bits) = std::env::var("PACKET_HANDLER_MAX_PACKET_BITS") {
            if let Ok(val) = bits.parse::<u32>() {
                config.handler.max_packet_bits = val;
            }
        }

        if let Ok(key) = std::env::var("PACKET_HANDLER_ENCRYPTION_KEY") {
            config.encryption.key = Some(key);
            config.encryption.enabled = true;
        }

        if let Ok(enabled) = std::env::var("PACKET_HANDLER_DDOS_ENABLED") {
            if let Ok(val) = enabled.parse::<bool>() {
                config.ddos.enabled = val;
            }
        }

        if let Ok(resend) = std::env::var("PACKET_HANDLER_RESEND_RESOLUTION_MS") {
            if let Ok(val) = resend.parse::<u64>() {
                config.reliability.resend_resolution_time = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("PACKET_HANDLER_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
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
            .map_err(|e| HandlerError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| HandlerError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.handler.validate());
        errors.extend(self.handshake.validate());
        errors.extend(self.reliability.validate());
        errors.extend(self.encryption.validate(&self.handler));
        errors.extend(self.compression.validate());
        errors.extend(self.ddos.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Built-in component kinds, in the order they appear in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    StatelessConnect,
    Reliability,
    Encryption,
    Compression,
}

/// Chain layout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Largest datagram the socket accepts, in bits
    pub max_packet_bits: u32,

    /// Components in registration order. Outgoing runs first to last, incoming last to first.
    pub components: Vec<ComponentKind>,

    /// Outgoing packets held before initialisation completes; the oldest is dropped beyond this
    pub max_buffered_packets: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_packet_bits: DEFAULT_MAX_PACKET_BITS,
            components: vec![ComponentKind::StatelessConnect],
            max_buffered_packets: DEFAULT_MAX_BUFFERED_PACKETS,
        }
    }
}

impl HandlerConfig {
    /// Validate chain configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_bits < MIN_MAX_PACKET_BITS {
            errors.push(format!(
                "max_packet_bits too small: {} (minimum: {})",
                self.max_packet_bits, MIN_MAX_PACKET_BITS
            ));
        } else if self.max_packet_bits > 65_507 * 8 {
            errors.push(format!(
                "max_packet_bits too large: {} (exceeds a UDP datagram)",
                self.max_packet_bits
            ));
        }

        if self.max_buffered_packets == 0 {
            errors.push("max_buffered_packets must be at least 1".to_string());
        }

        for (i, kind) in self.components.iter().enumerate() {
            if self.components[..i].contains(kind) {
                errors.push(format!("Component {kind:?} is listed more than once"));
            }
        }

        if let Some(pos) = self
            .components
            .iter()
            .position(|k| *k == ComponentKind::StatelessConnect)
        {
            if pos + 1 != self.components.len() {
                errors.push(
                    "stateless_connect must be the last (outermost) component in the chain"
                        .to_string(),
                );
            }
        }

        errors
    }
}

/// Stateless handshake configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Base interval between secret rotations
    #[serde(with = "duration_serde")]
    pub secret_update_time: Duration,

    /// Random variance applied to each rotation interval
    #[serde(with = "duration_serde")]
    pub secret_update_time_variance: Duration,

    /// How often an unacknowledged client resends its handshake packet
    #[serde(with = "duration_serde")]
    pub handshake_resend_interval: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            secret_update_time: Duration::from_secs(15),
            secret_update_time_variance: Duration::from_secs(5),
            handshake_resend_interval: Duration::from_secs(1),
        }
    }
}

impl HandshakeConfig {
    /// Longest time a cookie stays valid: two full (worst case) rotation periods
    pub fn max_cookie_lifetime(&self) -> Duration {
        (self.secret_update_time + self.secret_update_time_variance) * 2
    }

    /// Validate handshake configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.secret_update_time.as_millis() < 1000 {
            errors.push("Secret update time too short (minimum: 1s)".to_string());
        } else if self.secret_update_time.as_secs() > 3600 {
            errors.push("Secret update time too long (maximum: 1 hour)".to_string());
        }

        if self.secret_update_time_variance >= self.secret_update_time {
            errors.push("Secret update variance must be smaller than the update time".to_string());
        }

        if self.handshake_resend_interval.as_millis() < 50 {
            errors.push("Handshake resend interval too short (minimum: 50ms)".to_string());
        } else if self.handshake_resend_interval >= self.max_cookie_lifetime() {
            errors.push(
                "Handshake resend interval must be shorter than the cookie lifetime".to_string(),
            );
        }

        errors
    }
}

/// Reliability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Minimum spacing between resend passes
    #[serde(with = "duration_serde")]
    pub resend_resolution_time: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            resend_resolution_time: Duration::from_millis(100),
        }
    }
}

impl ReliabilityConfig {
    /// Validate reliability configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.resend_resolution_time.as_millis() < 10 {
            errors.push("Resend resolution time too short (minimum: 10ms)".to_string());
        } else if self.resend_resolution_time.as_secs() > 10 {
            errors.push("Resend resolution time too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Encrypt outgoing packets once the key is set
    pub enabled: bool,

    /// AES-256 key as 64 hex characters
    pub key: Option<String>,
}

impl EncryptionConfig {
    /// Decode the configured key
    pub fn key_bytes(&self) -> Result<Option<[u8; ENCRYPTION_KEY_BYTES]>> {
        let Some(ref hex_key) = self.key else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| HandlerError::ConfigError(format!("Encryption key is not hex: {e}")))?;
        let key: [u8; ENCRYPTION_KEY_BYTES] = bytes.try_into().map_err(|_| {
            HandlerError::ConfigError(crate::error::constants::ERR_INVALID_KEY_LENGTH.into())
        })?;
        Ok(Some(key))
    }

    /// Validate encryption configuration against the chain it will be used in
    pub fn validate(&self, handler: &HandlerConfig) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.key_bytes() {
            errors.push(e.to_string());
        }

        if self.enabled {
            if self.key.is_none() {
                errors.push("Encryption is enabled but no key is configured".to_string());
            }
            if !handler.components.contains(&ComponentKind::Encryption) {
                errors.push(
                    "Encryption is enabled but the chain has no encryption component".to_string(),
                );
            }
        }

        errors
    }
}

/// Compression configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Codec used by the compression component
    pub kind: CompressionKind,

    /// Minimum payload size (bytes) before compression is attempted
    pub threshold_bytes: usize,

    /// Zstd compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            kind: CompressionKind::Lz4,
            threshold_bytes: 128,
            level: 1,
        }
    }
}

impl CompressionConfig {
    /// Validate compression configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if matches!(self.kind, CompressionKind::Zstd) && !(1..=22).contains(&self.level) {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.level
            ));
        }

        if self.threshold_bytes > 65_507 {
            errors.push("Compression threshold cannot be larger than a UDP datagram".to_string());
        }

        errors
    }
}

/// One rung of the DDoS severity ladder.
///
/// Every quota and limit is optional: `None` never escalates on (or never limits by) that
/// metric, while `Some(0)` as a limit blocks everything it covers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SeverityLevel {
    /// Category name reported to logs and analytics
    pub name: String,

    /// Non-connection packets per second that escalate past this level
    #[serde(default)]
    pub escalate_packets_per_sec: Option<u32>,

    /// Bad packets per second that escalate past this level
    #[serde(default)]
    pub escalate_bad_packets_per_sec: Option<u32>,

    /// Receive time per frame (ms) that escalates past this level
    #[serde(default)]
    pub escalate_time_quota_ms: Option<u32>,

    /// Non-connection packets processed per frame while this level is active
    #[serde(default)]
    pub packet_limit_per_frame: Option<u32>,

    /// Time (ms) spent on non-connection packets per frame while this level is active
    #[serde(default)]
    pub time_limit_ms_per_frame: Option<u32>,

    /// Time (ms) spent on connection packets per frame while this level is active
    #[serde(default)]
    pub netconn_time_limit_ms_per_frame: Option<u32>,

    /// Quiet seconds required before dropping back from this level
    pub cooloff_seconds: u32,
}

impl SeverityLevel {
    /// A level with no quotas or limits
    pub fn new(name: impl Into<String>, cooloff_seconds: u32) -> Self {
        Self {
            name: name.into(),
            escalate_packets_per_sec: None,
            escalate_bad_packets_per_sec: None,
            escalate_time_quota_ms: None,
            packet_limit_per_frame: None,
            time_limit_ms_per_frame: None,
            netconn_time_limit_ms_per_frame: None,
            cooloff_seconds,
        }
    }
}

/// DDoS detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DdosConfig {
    /// Master switch; a disabled detector never escalates or limits
    pub enabled: bool,

    /// Fire the analytics callback on new worst-ever severity levels
    pub analytics: bool,

    /// Log lines allowed per frame while escalated
    pub log_spam_limit: u32,

    /// Frame time (ms) that counts as a hitch
    pub hitch_time_quota_ms: Option<u32>,

    /// Consecutive hitch frames tolerated before frame adjustment is pinned to 1.0
    pub hitch_frame_tolerance: u32,

    /// Target tick rate; sets the expected frame time
    pub max_tick_rate: f32,

    /// Ordered severity ladder; index 0 is the baseline
    pub severity: Vec<SeverityLevel>,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analytics: false,
            log_spam_limit: 64,
            hitch_time_quota_ms: Some(500),
            hitch_frame_tolerance: 3,
            max_tick_rate: 30.0,
            severity: default_severity_ladder(),
        }
    }
}

/// Five-level ladder from light bursts to debilitating floods
pub fn default_severity_ladder() -> Vec<SeverityLevel> {
    vec![
        SeverityLevel {
            escalate_packets_per_sec: Some(800),
            escalate_bad_packets_per_sec: Some(16),
            ..SeverityLevel::new("Burst", 10)
        },
        SeverityLevel {
            escalate_packets_per_sec: Some(1200),
            escalate_bad_packets_per_sec: Some(64),
            escalate_time_quota_ms: Some(10),
            packet_limit_per_frame: Some(1024),
            time_limit_ms_per_frame: Some(8),
            ..SeverityLevel::new("PersistentBurst", 10)
        },
        SeverityLevel {
            escalate_packets_per_sec: Some(2000),
            escalate_bad_packets_per_sec: Some(128),
            escalate_time_quota_ms: Some(16),
            packet_limit_per_frame: Some(512),
            time_limit_ms_per_frame: Some(4),
            ..SeverityLevel::new("DDoS", 10)
        },
        SeverityLevel {
            escalate_time_quota_ms: Some(200),
            packet_limit_per_frame: Some(128),
            time_limit_ms_per_frame: Some(4),
            ..SeverityLevel::new("ExpensiveDDoS", 15)
        },
        SeverityLevel {
            packet_limit_per_frame: Some(0),
            time_limit_ms_per_frame: Some(0),
            netconn_time_limit_ms_per_frame: Some(25),
            ..SeverityLevel::new("DebilitatingDDoS", 30)
        },
    ]
}

impl DdosConfig {
    /// Expected duration of one frame at `max_tick_rate`, in seconds
    pub fn expected_frame_time(&self) -> f32 {
        if self.max_tick_rate > 0.0 {
            1.0 / self.max_tick_rate
        } else {
            0.0
        }
    }

    /// Validate DDoS configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enabled && self.severity.is_empty() {
            errors.push(crate::error::constants::ERR_EMPTY_SEVERITY_LADDER.to_string());
        }

        for (i, level) in self.severity.iter().enumerate() {
            if level.name.is_empty() {
                errors.push(format!("Severity level {i} has an empty name"));
            }
            if i > 0 && level.cooloff_seconds == 0 {
                errors.push(format!(
                    "Severity level '{}' needs a cooloff of at least 1 second",
                    level.name
                ));
            }
        }

        if self.log_spam_limit == 0 {
            errors.push("log_spam_limit must be greater than 0".to_string());
        }

        if !(self.max_tick_rate > 0.0) {
            errors.push(format!(
                "max_tick_rate must be positive (got {})",
                self.max_tick_rate
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
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
            app_name: String::from("packet-handler"),
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

/// Helper module for Duration serialization/deserialization
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
