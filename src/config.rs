//! Client and daemon settings. The daemon may also read a TOML file; command
//! line flags override whatever the file sets.

use crate::fs_enum::FileFilter;
use crate::protocol::{timeouts, DEFAULT_PORT, DISCOVERY_PORT};
use crate::transfer::TransferMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub root: PathBuf,
    /// Server host; `None` triggers discovery
    pub host: Option<String>,
    pub port: u16,
    pub discovery_port: u16,
    /// Bound on the discovery wait; `None` waits indefinitely
    pub discover_timeout: Option<Duration>,
    pub mode: TransferMode,
    pub filter: FileFilter,
}

impl ClientConfig {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            host: None,
            port: DEFAULT_PORT,
            discovery_port: DISCOVERY_PORT,
            discover_timeout: None,
            mode: TransferMode::default(),
            filter: FileFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub bind: String,
    pub root: PathBuf,
    pub mode: TransferMode,
    /// Broadcast discovery beacons
    pub beacon: bool,
    pub beacon_port: u16,
    pub beacon_interval_ms: u64,
    /// Address announced in beacons; detected when unset
    pub advertise: Option<Ipv4Addr>,
    pub log_file: Option<PathBuf>,
    /// Per-connection idle read timeout; 0 disables it
    pub idle_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            root: PathBuf::from("."),
            mode: TransferMode::default(),
            beacon: true,
            beacon_port: DISCOVERY_PORT,
            beacon_interval_ms: timeouts::BEACON_INTERVAL_MS,
            advertise: None,
            log_file: None,
            idle_timeout_ms: timeouts::IDLE_READ_MS,
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("invalid daemon config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms.max(1))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_defaults() {
        let cfg = DaemonConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:65029");
        assert_eq!(cfg.mode, TransferMode::Deflate);
        assert!(cfg.beacon);
        assert_eq!(cfg.beacon_port, 0xFE05);
        assert_eq!(cfg.beacon_interval(), Duration::from_secs(1));
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(300)));
        let off = DaemonConfig::from_toml_str("idle_timeout_ms = 0").unwrap();
        assert_eq!(off.idle_timeout(), None);
    }

    #[test]
    fn test_daemon_toml_overrides() {
        let cfg = DaemonConfig::from_toml_str(
            r#"
            bind = "127.0.0.1:7000"
            root = "/srv/mirror"
            mode = "raw"
            beacon = false
            advertise = "192.168.0.5"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:7000");
        assert_eq!(cfg.root, PathBuf::from("/srv/mirror"));
        assert_eq!(cfg.mode, TransferMode::Raw);
        assert!(!cfg.beacon);
        assert_eq!(cfg.advertise, Some(Ipv4Addr::new(192, 168, 0, 5)));
    }

    #[test]
    fn test_daemon_toml_rejects_unknown_keys() {
        assert!(DaemonConfig::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_client_defaults() {
        let cfg = ClientConfig::new("/tmp/src");
        assert_eq!(cfg.port, 65029);
        assert!(cfg.host.is_none());
        assert!(cfg.discover_timeout.is_none());
    }
}
