//! Shared CLI definitions for the client and the daemon

use crate::config::{ClientConfig, DaemonConfig};
use crate::fs_enum::FileFilter;
use crate::protocol::{DEFAULT_PORT, DISCOVERY_PORT};
use crate::transfer::TransferMode;
use anyhow::Result;
use clap::{ArgAction, Parser};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Mirror a local directory tree onto a dirpushd server
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct ClientOpts {
    /// Local directory to mirror
    pub root: PathBuf,

    /// Server host; discovered by UDP broadcast when omitted
    pub host: Option<String>,

    /// Server TCP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Transfer encoding; must match the server's
    #[arg(long, value_enum, default_value_t = TransferMode::Deflate)]
    pub mode: TransferMode,

    /// Give up discovery after this many seconds (default: wait forever)
    #[arg(long = "discover-timeout")]
    pub discover_timeout: Option<u64>,

    /// UDP port to listen on for discovery beacons
    #[arg(long = "discovery-port", default_value_t = DISCOVERY_PORT)]
    pub discovery_port: u16,

    /// Exclude files matching patterns
    #[arg(long = "xf", action = ArgAction::Append)]
    pub exclude_files: Vec<String>,

    /// Exclude directories matching patterns
    #[arg(long = "xd", action = ArgAction::Append)]
    pub exclude_dirs: Vec<String>,

    /// Print each operation as it happens
    #[arg(short, long)]
    pub verbose: bool,

    /// Append timestamped event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl ClientOpts {
    pub fn to_config(&self) -> ClientConfig {
        ClientConfig {
            root: self.root.clone(),
            host: self.host.clone(),
            port: self.port,
            discovery_port: self.discovery_port,
            discover_timeout: self.discover_timeout.map(Duration::from_secs),
            mode: self.mode,
            filter: FileFilter {
                exclude_files: self.exclude_files.clone(),
                exclude_dirs: self.exclude_dirs.clone(),
            },
        }
    }
}

/// Receive mirrored trees from dirpush clients
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct DaemonOpts {
    /// TOML config file; flags given here override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Transfer encoding; must match the clients'
    #[arg(long, value_enum)]
    pub mode: Option<TransferMode>,

    /// Do not broadcast discovery beacons
    #[arg(long = "no-beacon")]
    pub no_beacon: bool,

    /// Address to announce in beacons (default: detected)
    #[arg(long)]
    pub advertise: Option<Ipv4Addr>,

    /// UDP port beacons are sent to
    #[arg(long = "beacon-port")]
    pub beacon_port: Option<u16>,

    /// Drop a connection idle for this many milliseconds (0 = never)
    #[arg(long = "idle-timeout-ms")]
    pub idle_timeout_ms: Option<u64>,

    /// Print each request as it is served
    #[arg(short, long)]
    pub verbose: bool,

    /// Append timestamped event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl DaemonOpts {
    /// Config file (if any) with command line overrides applied
    pub fn resolve(&self) -> Result<DaemonConfig> {
        let mut cfg = match &self.config {
            Some(p) => DaemonConfig::load(p)?,
            None => DaemonConfig::default(),
        };
        if let Some(b) = &self.bind {
            cfg.bind = b.clone();
        }
        if let Some(r) = &self.root {
            cfg.root = r.clone();
        }
        if let Some(m) = self.mode {
            cfg.mode = m;
        }
        if self.no_beacon {
            cfg.beacon = false;
        }
        if self.advertise.is_some() {
            cfg.advertise = self.advertise;
        }
        if let Some(p) = self.beacon_port {
            cfg.beacon_port = p;
        }
        if self.log_file.is_some() {
            cfg.log_file = self.log_file.clone();
        }
        if let Some(ms) = self.idle_timeout_ms {
            cfg.idle_timeout_ms = ms;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_positional_and_flags() {
        let opts = ClientOpts::try_parse_from([
            "dirpush", "/src", "nas.local", "--mode", "raw", "--xf", "*.tmp", "--xd", ".git",
        ])
        .unwrap();
        let cfg = opts.to_config();
        assert_eq!(cfg.root, PathBuf::from("/src"));
        assert_eq!(cfg.host.as_deref(), Some("nas.local"));
        assert_eq!(cfg.mode, TransferMode::Raw);
        assert_eq!(cfg.port, 65029);
        assert_eq!(cfg.filter.exclude_files, vec!["*.tmp"]);
        assert_eq!(cfg.filter.exclude_dirs, vec![".git"]);
    }

    #[test]
    fn test_client_without_host_discovers() {
        let opts = ClientOpts::try_parse_from(["dirpush", "/src", "--discover-timeout", "3"]).unwrap();
        let cfg = opts.to_config();
        assert!(cfg.host.is_none());
        assert_eq!(cfg.discover_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_daemon_flags_override_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dirpushd.toml");
        std::fs::write(&path, "bind = \"127.0.0.1:9000\"\nmode = \"raw\"\nroot = \"/data\"\n").unwrap();

        let opts = DaemonOpts::try_parse_from([
            "dirpushd",
            "--config",
            path.to_str().unwrap(),
            "--root",
            "/other",
            "--no-beacon",
            "--idle-timeout-ms",
            "0",
        ])
        .unwrap();
        let cfg = opts.resolve().unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert_eq!(cfg.mode, TransferMode::Raw);
        assert_eq!(cfg.root, PathBuf::from("/other"));
        assert!(!cfg.beacon);
        assert_eq!(cfg.idle_timeout(), None);
    }
}
