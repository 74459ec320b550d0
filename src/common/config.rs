//! # Configuration
//!
//! TOML configuration for the queue server. Every field has a default, so an
//! empty file (or no file at all) yields a working single-LAN setup.
//!
//! ## Example TOML
//!
//! ```toml
//! [server]
//! port = 3000
//! bind_address = "0.0.0.0"
//! static_dir = "public"
//!
//! [discovery]
//! port = 41234
//! probe_retries = 4
//! probe_interval_ms = 350
//! probe_timeout_ms = 1800
//! announce_interval_ms = 800
//! lan_ranges = ["192.168.0.0/16", "10.0.0.0/8"]
//! excluded_ranges = ["192.168.56.0/24"]
//! excluded_interfaces = ["docker", "veth", "br-", "vboxnet", "vmnet"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::discovery::scanner::Ipv4Range;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: AppConfig = load_config("config/queue.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: T =
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

/// Complete configuration of one queue server instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP / WebSocket service settings
    pub server: ServiceConfig,
    /// LAN discovery and election settings
    pub discovery: DiscoveryConfig,
}

/// Where the counter service listens and what it serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// TCP port shared by the push channel and the static files
    pub port: u16,
    /// Address the service listener binds to
    pub bind_address: String,
    /// Directory holding `display.html`, `admin.html` and friends
    pub static_dir: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            static_dir: "public".to_string(),
        }
    }
}

impl ServiceConfig {
    /// `bind_address:port`, ready for `TcpListener::bind`.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Discovery protocol timing and network filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Well-known UDP port shared by every instance
    pub port: u16,
    /// Number of WHO_IS rounds sent by a starting instance
    pub probe_retries: u32,
    /// Delay between two WHO_IS rounds (milliseconds)
    pub probe_interval_ms: u64,
    /// Overall wait for an ANNOUNCE, counted from the first probe (milliseconds)
    pub probe_timeout_ms: u64,
    /// Period of the proactive ANNOUNCE broadcast once serving (milliseconds)
    pub announce_interval_ms: u64,
    /// Private ranges an address must fall in to count as a LAN address
    pub lan_ranges: Vec<Ipv4Range>,
    /// Ranges used by container/VM bridges, never treated as LAN
    pub excluded_ranges: Vec<Ipv4Range>,
    /// Interface name prefixes of virtual adapters
    pub excluded_interfaces: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: 41234,
            probe_retries: 4,
            probe_interval_ms: 350,
            probe_timeout_ms: 1800,
            announce_interval_ms: 800,
            lan_ranges: vec![
                Ipv4Range::new([192, 168, 0, 0].into(), 16),
                Ipv4Range::new([10, 0, 0, 0].into(), 8),
            ],
            excluded_ranges: vec![Ipv4Range::new([192, 168, 56, 0].into(), 24)],
            excluded_interfaces: ["docker", "veth", "br-", "vboxnet", "vmnet", "virbr"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DiscoveryConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    /// How long a freshly elected server counts as a newcomer in conflicts.
    ///
    /// A server that was already announcing when this instance probed would
    /// have been heard within one probe timeout plus one announce period.
    pub fn settle_window(&self) -> Duration {
        self.probe_timeout() + self.announce_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.listen_address(), "0.0.0.0:3000");
        assert_eq!(config.discovery.port, 41234);
        assert_eq!(config.discovery.probe_retries, 4);
        assert_eq!(config.discovery.probe_interval(), Duration::from_millis(350));
        assert_eq!(config.discovery.probe_timeout(), Duration::from_millis(1800));
        assert_eq!(config.discovery.announce_interval(), Duration::from_millis(800));
        assert_eq!(config.discovery.settle_window(), Duration::from_millis(2600));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 8080\n\n[discovery]\nexcluded_ranges = [\"172.17.0.0/16\"]"
        )
        .unwrap();

        let config: AppConfig = load_config(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.static_dir, "public");
        assert_eq!(config.discovery.port, 41234);
        assert_eq!(config.discovery.excluded_ranges.len(), 1);
        assert!(config.discovery.excluded_ranges[0].contains(Ipv4Addr::new(172, 17, 3, 4)));
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discovery]\nlan_ranges = [\"192.168.0.0/40\"]").unwrap();

        let result: Result<AppConfig> = load_config(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result: Result<AppConfig> = load_config("/nonexistent/queue.toml");
        assert!(result.is_err());
    }
}
