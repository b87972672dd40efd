// Relay configuration.
//
// `RelayConfig` holds everything `start_relay` needs: listen addresses, the
// poll and timeout cadence of the blocking loops, and the campus roster.
// Every field has a default, so a config file (JSON) only lists what it
// changes. `ServerArgs` is the `clap` command line of the `campus-relay`
// binary; its flags override whatever the file provided.
//
// Durations are stored as milliseconds so the JSON stays flat and readable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::identity::IdentityStore;

pub const DEFAULT_TCP_PORT: u16 = 54000;
pub const DEFAULT_UDP_PORT: u16 = 54001;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub bind_address: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Upper bound on how long any loop blocks before re-checking the
    /// running flag.
    pub poll_interval_ms: u64,
    /// How long a new connection may take to send its auth frame.
    pub handshake_timeout_ms: u64,
    /// Send deadline for a single routed frame.
    pub send_timeout_ms: u64,
    pub campuses: IdentityStore,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            poll_interval_ms: 1000,
            handshake_timeout_ms: 5000,
            send_timeout_ms: 5000,
            campuses: IdentityStore::default(),
        }
    }
}

impl RelayConfig {
    /// Config for tests and embedding: loopback, OS-assigned ports, short
    /// poll interval.
    pub fn ephemeral() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            tcp_port: 0,
            udp_port: 0,
            poll_interval_ms: 50,
            ..Self::default()
        }
    }

    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| RelayError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero timeout means "block forever" to the socket API.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }
}

/// Command line of the `campus-relay` binary.
#[derive(Parser, Debug, Default)]
#[command(name = "campus-relay", version, about = "Central relay for campus information exchange")]
pub struct ServerArgs {
    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind both sockets to
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// TCP port for authentication and messages
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// UDP port for heartbeats and broadcasts
    #[arg(long)]
    pub udp_port: Option<u16>,

    /// Poll interval of the blocking loops, in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

impl ServerArgs {
    /// Load the config file (if any) and apply command-line overrides.
    pub fn into_config(self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.tcp_port {
            config.tcp_port = port;
        }
        if let Some(port) = self.udp_port {
            config.udp_port = port;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_well_known_ports() {
        let config = RelayConfig::default();
        assert_eq!(config.tcp_port, 54000);
        assert_eq!(config.udp_port, 54001);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.campuses.len(), 5);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tcp_port": 6000, "campuses": {{"Quetta": "NU-QTA-1"}}}}"#
        )
        .unwrap();

        let config = RelayConfig::load(file.path()).unwrap();
        assert_eq!(config.tcp_port, 6000);
        assert_eq!(config.udp_port, DEFAULT_UDP_PORT);
        assert!(config.campuses.verify("Quetta", "NU-QTA-1"));
        assert!(!config.campuses.contains("Lahore"));
    }

    #[test]
    fn unknown_field_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tcp_prot": 6000}}"#).unwrap();

        let err = RelayConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = RelayConfig::load(Path::new("/nonexistent/campus-relay.json")).unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
    }

    #[test]
    fn command_line_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tcp_port": 6000, "udp_port": 6001}}"#).unwrap();

        let args = ServerArgs::parse_from([
            "campus-relay",
            "--config",
            file.path().to_str().unwrap(),
            "--udp-port",
            "7001",
            "--bind",
            "127.0.0.1",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.tcp_port, 6000);
        assert_eq!(config.udp_port, 7001);
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = RelayConfig {
            poll_interval_ms: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
