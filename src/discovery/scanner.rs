//! # Network Interface Scanner
//!
//! Runs once at startup and works out where discovery datagrams should go:
//! the LAN addresses of this host and the broadcast address of each subnet.
//!
//! ## Filtering
//!
//! An interface address is kept when it is IPv4, not loopback, not on an
//! interface whose name starts with one of the configured virtual prefixes,
//! outside every excluded range, and inside at least one LAN range.
//!
//! Scanning never fails. A host without usable interfaces gets a profile with
//! no LAN addresses, the limited broadcast address and `127.0.0.1` as primary.

use log::{debug, info, warn};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::common::config::DiscoveryConfig;

/// An IPv4 CIDR block such as `192.168.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Range {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Range {
    /// `prefix` is clamped to 32.
    pub fn new(network: Ipv4Addr, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        let network = Ipv4Addr::from(u32::from(network) & u32::from(prefix_mask(prefix)));
        Self { network, prefix }
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let mask = u32::from(prefix_mask(self.prefix));
        u32::from(address) & mask == u32::from(self.network)
    }
}

impl FromStr for Ipv4Range {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (network, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("`{}` is not in address/prefix form", s))?;
        let network = network
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|e| format!("`{}`: {}", s, e))?;
        let prefix = prefix
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| format!("`{}`: prefix must be 0-32", s))?;
        Ok(Self::new(network, prefix))
    }
}

impl TryFrom<String> for Ipv4Range {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Range> for String {
    fn from(range: Ipv4Range) -> Self {
        range.to_string()
    }
}

impl fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn prefix_mask(prefix: u8) -> Ipv4Addr {
    match prefix {
        0 => Ipv4Addr::UNSPECIFIED,
        p => Ipv4Addr::from(u32::MAX << (32 - u32::from(p.min(32)))),
    }
}

/// `(address AND netmask) OR (NOT netmask)`.
pub fn compute_broadcast(address: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let address = u32::from(address);
    let netmask = u32::from(netmask);
    Ipv4Addr::from((address & netmask) | !netmask)
}

/// Broadcast address of the subnet, or `None` when the mask is missing or not
/// a contiguous run of ones.
pub fn subnet_broadcast(address: Ipv4Addr, netmask: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
    let netmask = netmask?;
    let bits = u32::from(netmask);
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return None;
    }
    Some(compute_broadcast(address, netmask))
}

/// One IPv4 address bound to a host interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub name: String,
    pub address: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
}

/// Where this instance lives on the LAN, computed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    /// Usable LAN addresses of this host, first discovered first
    pub addresses: Vec<Ipv4Addr>,
    /// Subnet broadcast addresses, always ending with `255.255.255.255`
    pub broadcasts: Vec<Ipv4Addr>,
    /// Address reported to peers in ANNOUNCE messages
    pub primary: Ipv4Addr,
}

impl NetworkProfile {
    /// Build a profile from explicit address lists, deduplicating both and
    /// deriving the primary address.
    pub fn new(addresses: Vec<Ipv4Addr>, broadcasts: Vec<Ipv4Addr>) -> Self {
        let addresses = dedup(addresses);
        let broadcasts = dedup(broadcasts);
        let primary = addresses.first().copied().unwrap_or(Ipv4Addr::LOCALHOST);
        Self {
            addresses,
            broadcasts,
            primary,
        }
    }

    /// Every address a WHO_IS probe is sent to.
    pub fn probe_targets(&self, port: u16) -> Vec<SocketAddr> {
        dedup(self.broadcasts.iter().chain(&self.addresses).copied().collect())
            .into_iter()
            .map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, port)))
            .collect()
    }

    /// Every address the periodic ANNOUNCE is sent to.
    pub fn announce_targets(&self, port: u16) -> Vec<SocketAddr> {
        self.broadcasts
            .iter()
            .map(|ip| SocketAddr::V4(SocketAddrV4::new(*ip, port)))
            .collect()
    }
}

fn dedup(addresses: Vec<Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut seen = Vec::with_capacity(addresses.len());
    for address in addresses {
        if !seen.contains(&address) {
            seen.push(address);
        }
    }
    seen
}

/// Enumerate host interfaces and build the profile.
pub fn scan(settings: &DiscoveryConfig) -> NetworkProfile {
    let profile = build_profile(&list_interfaces(), settings);
    info!(
        "🔎 Network scan: LAN addresses {:?}, broadcast targets {:?}, primary {}",
        profile.addresses, profile.broadcasts, profile.primary
    );
    profile
}

/// IPv4 addresses of every host interface, unfiltered.
pub fn list_interfaces() -> Vec<InterfaceAddress> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("⚠️  Could not enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut result = Vec::new();
    for iface in interfaces {
        for addr in &iface.addr {
            if let Addr::V4(v4) = addr {
                result.push(InterfaceAddress {
                    name: iface.name.clone(),
                    address: v4.ip,
                    netmask: v4.netmask,
                });
            }
        }
    }
    result
}

/// Apply the LAN filters to `interfaces`. Pure apart from logging.
pub fn build_profile(interfaces: &[InterfaceAddress], settings: &DiscoveryConfig) -> NetworkProfile {
    let mut addresses = Vec::new();
    let mut broadcasts = Vec::new();

    for iface in interfaces {
        if !is_lan_address(iface, settings) {
            continue;
        }

        addresses.push(iface.address);
        match subnet_broadcast(iface.address, iface.netmask) {
            Some(broadcast) => broadcasts.push(broadcast),
            None => warn!(
                "⚠️  Interface {} ({}) has an unusable netmask {:?}, skipping its broadcast",
                iface.name, iface.address, iface.netmask
            ),
        }
    }

    broadcasts.push(Ipv4Addr::BROADCAST);
    NetworkProfile::new(addresses, broadcasts)
}

fn is_lan_address(iface: &InterfaceAddress, settings: &DiscoveryConfig) -> bool {
    let address = iface.address;

    if address.is_loopback() || address.is_unspecified() {
        return false;
    }
    if settings
        .excluded_interfaces
        .iter()
        .any(|prefix| iface.name.starts_with(prefix.as_str()))
    {
        debug!("Skipping virtual interface {} ({})", iface.name, address);
        return false;
    }
    if settings.excluded_ranges.iter().any(|r| r.contains(address)) {
        debug!("Skipping excluded address {} on {}", address, iface.name);
        return false;
    }
    settings.lan_ranges.iter().any(|r| r.contains(address))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, address: [u8; 4], netmask: Option<[u8; 4]>) -> InterfaceAddress {
        InterfaceAddress {
            name: name.to_string(),
            address: address.into(),
            netmask: netmask.map(Ipv4Addr::from),
        }
    }

    #[test]
    fn test_broadcast_octets() {
        let addresses = [
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(10, 20, 30, 40),
            Ipv4Addr::new(172, 16, 254, 1),
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(255, 255, 255, 255),
        ];

        for address in addresses {
            for prefix in 0..=32u8 {
                let mask = prefix_mask(prefix);
                let broadcast = compute_broadcast(address, mask);
                for i in 0..4 {
                    let a = address.octets()[i];
                    let m = mask.octets()[i];
                    assert_eq!(broadcast.octets()[i], (a & m) | (!m & 0xff));
                }
            }
        }
    }

    #[test]
    fn test_subnet_broadcast() {
        assert_eq!(
            subnet_broadcast(
                Ipv4Addr::new(192, 168, 1, 10),
                Some(Ipv4Addr::new(255, 255, 255, 0))
            ),
            Some(Ipv4Addr::new(192, 168, 1, 255))
        );
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 1, 2, 3), Some(Ipv4Addr::new(255, 0, 0, 0))),
            Some(Ipv4Addr::new(10, 255, 255, 255))
        );
        assert_eq!(subnet_broadcast(Ipv4Addr::new(10, 1, 2, 3), None), None);
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(10, 1, 2, 3), Some(Ipv4Addr::new(255, 0, 255, 0))),
            None
        );
    }

    #[test]
    fn test_range_parsing() {
        let range: Ipv4Range = "192.168.56.7/24".parse().unwrap();

        assert_eq!(range.to_string(), "192.168.56.0/24");
        assert!(range.contains(Ipv4Addr::new(192, 168, 56, 200)));
        assert!(!range.contains(Ipv4Addr::new(192, 168, 57, 1)));
        assert!("192.168.0.0".parse::<Ipv4Range>().is_err());
        assert!("192.168.0.0/33".parse::<Ipv4Range>().is_err());
        assert!("nope/8".parse::<Ipv4Range>().is_err());
        assert!("0.0.0.0/0".parse::<Ipv4Range>().unwrap().contains(Ipv4Addr::BROADCAST));
    }

    #[test]
    fn test_profile_for_single_lan_interface() {
        let interfaces = vec![
            iface("lo", [127, 0, 0, 1], Some([255, 0, 0, 0])),
            iface("eth0", [192, 168, 1, 10], Some([255, 255, 255, 0])),
        ];

        let profile = build_profile(&interfaces, &DiscoveryConfig::default());

        assert_eq!(profile.addresses, vec![Ipv4Addr::new(192, 168, 1, 10)]);
        assert_eq!(
            profile.broadcasts,
            vec![Ipv4Addr::new(192, 168, 1, 255), Ipv4Addr::BROADCAST]
        );
        assert_eq!(profile.primary, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(
            profile.announce_targets(41234),
            vec![
                "192.168.1.255:41234".parse::<SocketAddr>().unwrap(),
                "255.255.255.255:41234".parse::<SocketAddr>().unwrap(),
            ]
        );
        assert_eq!(profile.probe_targets(41234).len(), 3);
    }

    #[test]
    fn test_virtual_and_public_addresses_are_filtered() {
        let interfaces = vec![
            iface("docker0", [10, 1, 0, 1], Some([255, 255, 0, 0])),
            iface("vboxnet0", [192, 168, 99, 1], Some([255, 255, 255, 0])),
            iface("eth1", [192, 168, 56, 1], Some([255, 255, 255, 0])),
            iface("eth2", [172, 16, 0, 5], Some([255, 255, 0, 0])),
            iface("eth3", [8, 8, 8, 8], Some([255, 255, 255, 0])),
        ];

        let profile = build_profile(&interfaces, &DiscoveryConfig::default());

        assert!(profile.addresses.is_empty());
        assert_eq!(profile.broadcasts, vec![Ipv4Addr::BROADCAST]);
        assert_eq!(profile.primary, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_duplicates_and_missing_masks() {
        let interfaces = vec![
            iface("wlan0", [10, 0, 0, 7], None),
            iface("eth0", [192, 168, 1, 10], Some([255, 255, 255, 0])),
            iface("eth0", [192, 168, 1, 11], Some([255, 255, 255, 0])),
            iface("eth0:1", [192, 168, 1, 10], Some([255, 255, 255, 0])),
        ];

        let profile = build_profile(&interfaces, &DiscoveryConfig::default());

        assert_eq!(
            profile.addresses,
            vec![
                Ipv4Addr::new(10, 0, 0, 7),
                Ipv4Addr::new(192, 168, 1, 10),
                Ipv4Addr::new(192, 168, 1, 11),
            ]
        );
        assert_eq!(
            profile.broadcasts,
            vec![Ipv4Addr::new(192, 168, 1, 255), Ipv4Addr::BROADCAST]
        );
        assert_eq!(profile.primary, Ipv4Addr::new(10, 0, 0, 7));
    }

    #[test]
    fn test_probe_targets_deduplicate() {
        let profile = NetworkProfile::new(
            vec![Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST],
            vec![Ipv4Addr::LOCALHOST],
        );

        assert_eq!(profile.addresses, vec![Ipv4Addr::LOCALHOST]);
        assert_eq!(
            profile.probe_targets(9),
            vec!["127.0.0.1:9".parse::<SocketAddr>().unwrap()]
        );
    }
}
