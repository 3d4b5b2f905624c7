//! Configuration file support for arpd.
//!
//! Loaded from TOML, default location `/etc/sonic/arpd.toml`. Every field has
//! a default so a partial (or missing) file is valid.

use crate::error::{ArpdError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/arpd.toml";

/// Bulk (GetBulk*) pagination settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Objects requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Starting marker for port pagination (first system port).
    #[serde(default = "default_port_start_marker")]
    pub port_start_marker: u32,
}

/// Depths of the channels owned by the topology core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,

    #[serde(default = "default_arp_delete_queue_depth")]
    pub arp_delete_queue_depth: usize,

    #[serde(default = "default_mac_move_queue_depth")]
    pub mac_move_queue_depth: usize,

    #[serde(default = "default_rx_queue_depth")]
    pub rx_queue_depth: usize,

    #[serde(default = "default_probe_queue_depth")]
    pub probe_queue_depth: usize,
}

/// Packet capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Appended to every port's base filter. Empty means none.
    #[serde(default = "default_extra_filter")]
    pub extra_filter: String,
}

/// Where the hardware abstraction plane is reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AsicdConfig {
    /// JSON topology snapshot served through the bulk API.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// JSON-lines notification stream; stdin when unset.
    #[serde(default)]
    pub notification_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default tracing filter directive (overridden by RUST_LOG).
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete arpd configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArpdConfig {
    #[serde(default)]
    pub bulk: BulkConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub asicd: AsicdConfig,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_page_size() -> u32 {
    100
}

fn default_port_start_marker() -> u32 {
    1
}

fn default_event_queue_depth() -> usize {
    1024
}

fn default_arp_delete_queue_depth() -> usize {
    256
}

fn default_mac_move_queue_depth() -> usize {
    64
}

fn default_rx_queue_depth() -> usize {
    1024
}

fn default_probe_queue_depth() -> usize {
    64
}

fn default_extra_filter() -> String {
    "arp".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            port_start_marker: default_port_start_marker(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: default_event_queue_depth(),
            arp_delete_queue_depth: default_arp_delete_queue_depth(),
            mac_move_queue_depth: default_mac_move_queue_depth(),
            rx_queue_depth: default_rx_queue_depth(),
            probe_queue_depth: default_probe_queue_depth(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            extra_filter: default_extra_filter(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ArpdConfig {
    /// Loads configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                ArpdError::Config(format!(
                    "failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ArpdError::Io(e)),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ArpdError::Config(format!("failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.bulk.page_size == 0 {
            return Err(ArpdError::Config("bulk.page_size must be > 0".to_string()));
        }

        let depths = [
            ("event_queue_depth", self.channels.event_queue_depth),
            ("arp_delete_queue_depth", self.channels.arp_delete_queue_depth),
            ("mac_move_queue_depth", self.channels.mac_move_queue_depth),
            ("rx_queue_depth", self.channels.rx_queue_depth),
            ("probe_queue_depth", self.channels.probe_queue_depth),
        ];
        if let Some((name, _)) = depths.iter().find(|(_, depth)| *depth == 0) {
            return Err(ArpdError::Config(format!("channels.{} must be > 0", name)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ArpdConfig::default();
        assert_eq!(config.bulk.page_size, 100);
        assert_eq!(config.bulk.port_start_marker, 1);
        assert_eq!(config.capture.extra_filter, "arp");
        assert_eq!(config.log.level, "info");
        assert!(config.asicd.snapshot_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[bulk]
page_size = 25

[channels]
arp_delete_queue_depth = 8
"#;
        let config: ArpdConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bulk.page_size, 25);
        assert_eq!(config.bulk.port_start_marker, 1);
        assert_eq!(config.channels.arp_delete_queue_depth, 8);
        assert_eq!(config.channels.event_queue_depth, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ArpdConfig::default();
        config.bulk.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = ArpdConfig::default();
        config.channels.rx_queue_depth = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rx_queue_depth"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[asicd]\nsnapshot_path = \"/var/run/arpd/topology.json\"\n[log]\nlevel = \"debug\""
        )
        .unwrap();

        let config = ArpdConfig::load_or_default(file.path()).unwrap();
        assert_eq!(
            config.asicd.snapshot_path,
            Some(PathBuf::from("/var/run/arpd/topology.json"))
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = ArpdConfig::load_or_default("/nonexistent/arpd.toml").unwrap();
        assert_eq!(config, ArpdConfig::default());
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bulk\npage_size = ").unwrap();
        assert!(matches!(
            ArpdConfig::load_or_default(file.path()),
            Err(ArpdError::Config(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ArpdConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("page_size"));
        let parsed: ArpdConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
