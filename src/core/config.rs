//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capture::record::RecordLayout;
use crate::core::errors::{LhmError, Result};

/// Full capture configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub layout: RecordLayout,
    pub render: RenderConfig,
    pub archive: ArchiveConfig,
    pub paths: PathsConfig,
    pub log: LogConfig,
}

/// Ingestion knobs: history depth, stall detection, transport timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Number of most recent samples kept in memory for plotting.
    pub max_len: usize,
    /// Undecodable input for longer than this marks the connection stale.
    pub conn_timeout_ms: u64,
    /// Upper bound on a single blocking transport read.
    pub read_timeout_ms: u64,
    /// Prefix of generated capture file names (`<prefix>-YYYY-MM-DD-HH-MM-SS.csv`).
    pub session_prefix: String,
}

/// Live plot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    pub interval_ms: u64,
    /// Channel names to draw. Empty means every channel in the layout.
    pub visible_channels: Vec<String>,
    /// Fold 360 degree wrap-arounds out of the yaw trace.
    pub unwrap_yaw: bool,
    pub yaw_channel: String,
}

/// Downsampling archive defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub dataset_dir: PathBuf,
    pub downsample: usize,
    pub skip_rows: usize,
}

/// Filesystem paths used by lahmo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub activity_log: PathBuf,
}

/// Activity log rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Rotate once the activity log would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated files kept next to the live one (`activity.jsonl.1` ...).
    pub max_rotated_files: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_len: 100,
            conn_timeout_ms: 5_000,
            read_timeout_ms: 250,
            session_prefix: "test".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            visible_channels: Vec::new(),
            unwrap_yaw: true,
            yaw_channel: "yaw".to_string(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset"),
            downsample: 10,
            skip_rows: 6,
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[LHM-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let data = home.join(".local").join("share").join("lahmo");
        Self {
            config_file: home.join(".config").join("lahmo").join("config.toml"),
            data_dir: data.join("captures"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LhmError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(LhmError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the JSON form, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("LAHMO_CAPTURE_MAX_LEN") {
            self.capture.max_len = parse_env("LAHMO_CAPTURE_MAX_LEN", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_CAPTURE_CONN_TIMEOUT_MS") {
            self.capture.conn_timeout_ms = parse_env("LAHMO_CAPTURE_CONN_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_CAPTURE_READ_TIMEOUT_MS") {
            self.capture.read_timeout_ms = parse_env("LAHMO_CAPTURE_READ_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_RENDER_INTERVAL_MS") {
            self.render.interval_ms = parse_env("LAHMO_RENDER_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_RENDER_UNWRAP_YAW") {
            self.render.unwrap_yaw = parse_env("LAHMO_RENDER_UNWRAP_YAW", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_PATHS_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("LAHMO_ARCHIVE_DOWNSAMPLE") {
            self.archive.downsample = parse_env("LAHMO_ARCHIVE_DOWNSAMPLE", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_ARCHIVE_SKIP_ROWS") {
            self.archive.skip_rows = parse_env("LAHMO_ARCHIVE_SKIP_ROWS", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_LOG_MAX_SIZE_BYTES") {
            self.log.max_size_bytes = parse_env("LAHMO_LOG_MAX_SIZE_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("LAHMO_LOG_MAX_ROTATED_FILES") {
            self.log.max_rotated_files = parse_env("LAHMO_LOG_MAX_ROTATED_FILES", &raw)?;
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.capture.max_len == 0 {
            return Err(invalid("capture.max_len must be >= 1"));
        }
        if self.capture.conn_timeout_ms == 0 || self.capture.read_timeout_ms == 0 {
            return Err(invalid(
                "capture.conn_timeout_ms and capture.read_timeout_ms must be > 0",
            ));
        }
        if self.capture.read_timeout_ms >= self.capture.conn_timeout_ms {
            return Err(invalid(format!(
                "capture.read_timeout_ms ({}) must be < capture.conn_timeout_ms ({})",
                self.capture.read_timeout_ms, self.capture.conn_timeout_ms
            )));
        }
        if self.capture.session_prefix.trim().is_empty() {
            return Err(invalid("capture.session_prefix must not be empty"));
        }

        if self.layout.channels.is_empty() {
            return Err(invalid("layout.channels must declare at least one channel"));
        }
        let mut seen = HashSet::new();
        for channel in &self.layout.channels {
            if channel.name.trim().is_empty() {
                return Err(invalid("layout.channels names must not be empty"));
            }
            if channel.name == "timestamp" {
                return Err(invalid("layout.channels must not redeclare `timestamp`"));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(invalid(format!(
                    "layout.channels has duplicate name `{}`",
                    channel.name
                )));
            }
        }

        if self.render.interval_ms == 0 {
            return Err(invalid("render.interval_ms must be > 0"));
        }
        for name in &self.render.visible_channels {
            if self.layout.index_of(name).is_none() {
                return Err(invalid(format!(
                    "render.visible_channels references unknown channel `{name}`"
                )));
            }
        }

        if self.archive.downsample == 0 {
            return Err(invalid("archive.downsample must be >= 1"));
        }

        if self.log.max_size_bytes == 0 {
            return Err(invalid("log.max_size_bytes must be > 0"));
        }

        Ok(())
    }
}

fn invalid(details: impl Into<String>) -> LhmError {
    LhmError::InvalidConfig {
        details: details.into(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| LhmError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
