//! WAL configuration.
//!
//! Loaded from the `[wal]` table of the node's TOML config, or built in code
//! with the `with_*` methods.
//!
//! # Example
//!
//! ```toml
//! enabled = true
//! dir = "/var/lib/tidelog/wal"
//! checkpoint_interval_ms = 300000
//! flush_on_shutdown = false
//! replay_memory_ceiling = "4GB"
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default segment size: four times the 128 MiB base segment size.
pub const DEFAULT_SEGMENT_SIZE: u64 = 4 * 128 * 1024 * 1024;

/// Smallest accepted segment size.
pub const MIN_SEGMENT_SIZE: u64 = 1024;

/// Default replay memory ceiling: 4 GiB.
pub const DEFAULT_REPLAY_MEMORY_CEILING: u64 = 4 * 1024 * 1024 * 1024;

/// WAL configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Whether the WAL is active. A disabled WAL accepts and discards
    /// every record and never touches the filesystem.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory holding segments and checkpoints (default: `wal`).
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Milliseconds between checkpoints (default: 5 minutes). Must be at least 1.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Write a final checkpoint and flush in-memory series when stopping.
    #[serde(default)]
    pub flush_on_shutdown: bool,

    /// Replayed-but-unflushed bytes allowed before replay flushes to storage.
    #[serde(default = "default_replay_memory_ceiling")]
    pub replay_memory_ceiling: ByteSize,

    /// Maximum segment size before rotation (default: 512 MiB).
    #[serde(default = "default_segment_size")]
    pub segment_size: ByteSize,
}

fn default_enabled() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from("wal")
}

fn default_checkpoint_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_replay_memory_ceiling() -> ByteSize {
    ByteSize(DEFAULT_REPLAY_MEMORY_CEILING)
}

fn default_segment_size() -> ByteSize {
    ByteSize(DEFAULT_SEGMENT_SIZE)
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            enabled: default_enabled(),
            dir: default_dir(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            flush_on_shutdown: false,
            replay_memory_ceiling: default_replay_memory_ceiling(),
            segment_size: default_segment_size(),
        }
    }
}

impl WalConfig {
    /// Create a new WAL configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with the WAL turned off.
    pub fn disabled() -> Self {
        WalConfig {
            enabled: false,
            ..Self::default()
        }
    }

    /// Create a configuration for tests: small segments, short interval.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        WalConfig {
            enabled: true,
            dir: dir.into(),
            checkpoint_interval_ms: 50,
            flush_on_shutdown: false,
            replay_memory_ceiling: ByteSize(1024 * 1024),
            segment_size: ByteSize(64 * 1024),
        }
    }

    /// Set the WAL directory (builder pattern).
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the checkpoint interval (builder pattern).
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set flush-on-shutdown (builder pattern).
    pub fn with_flush_on_shutdown(mut self, flush: bool) -> Self {
        self.flush_on_shutdown = flush;
        self
    }

    /// Set the replay memory ceiling in bytes (builder pattern).
    pub fn with_replay_memory_ceiling(mut self, bytes: u64) -> Self {
        self.replay_memory_ceiling = ByteSize(bytes);
        self
    }

    /// Set segment size (builder pattern).
    pub fn with_segment_size(mut self, bytes: u64) -> Self {
        self.segment_size = ByteSize(bytes);
        self
    }

    /// Checkpoint interval as a duration
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    /// Validate configuration.
    ///
    /// A disabled configuration is always valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.checkpoint_interval_ms < 1 {
            return Err(ConfigError::InvalidCheckpointInterval(
                self.checkpoint_interval_ms,
            ));
        }
        if self.segment_size.as_u64() < MIN_SEGMENT_SIZE {
            return Err(ConfigError::SegmentSizeTooSmall(self.segment_size.as_u64()));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WalConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: WalConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

/// WAL configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Checkpoint interval is zero.
    #[error("invalid checkpoint interval {0}ms: must be at least 1ms")]
    InvalidCheckpointInterval(u64),

    /// Segment size is too small (minimum 1KB).
    #[error("segment size {0} is below the 1KB minimum")]
    SegmentSizeTooSmall(u64),

    /// A byte size string could not be parsed.
    #[error("invalid byte size '{0}'")]
    InvalidByteSize(String),

    /// Config file could not be read.
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("failed to parse config{}: {message}", describe_path(.path))]
    Parse {
        /// File that was parsed, if any
        path: Option<PathBuf>,
        /// Parser message
        message: String,
    },

    /// Config could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

fn describe_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" file '{}'", p.display()))
        .unwrap_or_default()
}

/// A byte count that reads from either an integer or a string with a unit.
///
/// Units are base 2 and case-insensitive: `B`, `KB`/`KiB`, `MB`/`MiB`,
/// `GB`/`GiB`, `TB`/`TiB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    /// Size in bytes
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        ByteSize(bytes)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(&str, u64); 4] = [
            ("TiB", 1 << 40),
            ("GiB", 1 << 30),
            ("MiB", 1 << 20),
            ("KiB", 1 << 10),
        ];
        for (unit, scale) in UNITS {
            if self.0 >= scale && self.0 % scale == 0 {
                return write!(f, "{}{}", self.0 / scale, unit);
            }
        }
        write!(f, "{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        let invalid = || ConfigError::InvalidByteSize(s.to_string());
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let scale: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => 1 << 10,
            "m" | "mb" | "mib" => 1 << 20,
            "g" | "gb" | "gib" => 1 << 30,
            "t" | "tb" | "tib" => 1 << 40,
            _ => return Err(invalid()),
        };
        value.checked_mul(scale).map(ByteSize).ok_or_else(invalid)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(ByteSize(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = WalConfig::default();
        assert!(config.enabled);
        assert_eq!(config.dir, PathBuf::from("wal"));
        assert_eq!(config.checkpoint_interval(), Duration::from_secs(300));
        assert!(!config.flush_on_shutdown);
        assert_eq!(config.replay_memory_ceiling.as_u64(), 4 << 30);
        assert_eq!(config.segment_size.as_u64(), 512 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = WalConfig::from_toml_str("").unwrap();
        assert_eq!(config, WalConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = WalConfig::from_toml_str(
            r#"
            dir = "/data/wal"
            checkpoint_interval_ms = 1000
            flush_on_shutdown = true
            replay_memory_ceiling = "512MB"
            segment_size = 65536
            "#,
        )
        .unwrap();
        assert_eq!(config.dir, PathBuf::from("/data/wal"));
        assert_eq!(config.checkpoint_interval_ms, 1000);
        assert!(config.flush_on_shutdown);
        assert_eq!(config.replay_memory_ceiling, ByteSize(512 << 20));
        assert_eq!(config.segment_size, ByteSize(65536));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = WalConfig::from_toml_str("checkpoint_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCheckpointInterval(0)));

        let config = WalConfig::new().with_checkpoint_interval(Duration::from_micros(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_skips_validation() {
        let mut config = WalConfig::disabled();
        config.checkpoint_interval_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tiny_segment_rejected() {
        let config = WalConfig::new().with_segment_size(10);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SegmentSizeTooSmall(10))
        ));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = WalConfig::from_toml_str("enabled = \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
    }

    #[test]
    fn test_byte_size_parsing() {
        assert_eq!("0".parse::<ByteSize>().unwrap(), ByteSize(0));
        assert_eq!("100B".parse::<ByteSize>().unwrap(), ByteSize(100));
        assert_eq!("4kb".parse::<ByteSize>().unwrap(), ByteSize(4096));
        assert_eq!("2 MiB".parse::<ByteSize>().unwrap(), ByteSize(2 << 20));
        assert_eq!("4GB".parse::<ByteSize>().unwrap(), ByteSize(4 << 30));
        assert_eq!("1TB".parse::<ByteSize>().unwrap(), ByteSize(1 << 40));
        assert!("".parse::<ByteSize>().is_err());
        assert!("12 parsecs".parse::<ByteSize>().is_err());
        assert!("99999999999TB".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize(4 << 30).to_string(), "4GiB");
        assert_eq!(ByteSize(1500).to_string(), "1500B");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.toml");
        let config = WalConfig::for_testing(dir.path().join("wal")).with_flush_on_shutdown(true);
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(WalConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = WalConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
