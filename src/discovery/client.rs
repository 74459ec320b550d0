//! # Discovery Client
//!
//! Asks the LAN whether a queue server is already running.
//!
//! ## Protocol
//!
//! ```text
//! t=0          WHO_IS -> every broadcast and LAN address
//! t=interval   WHO_IS (again, `probe_retries` rounds in total)
//! ...
//! t=timeout    give up: NoPeerFound
//! ```
//!
//! Probing and listening run concurrently. The first ANNOUNCE carrying a
//! foreign identity ends the election with `PeerFound`, even if it arrives
//! after the last probe was sent.
//!
//! Answers to WHO_IS come back to the ephemeral probe socket. A second socket
//! shares the discovery port so the periodic ANNOUNCE of a running server is
//! heard too, even when every probe was lost. Unicast datagrams to a shared
//! port reach only one of the sockets on it, which is why probes always go to
//! the broadcast addresses as well.

use anyhow::Result;
use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

use super::scanner::NetworkProfile;
use super::socket::{bind_broadcast, MAX_DATAGRAM};
use super::ElectionOutcome;
use crate::common::config::DiscoveryConfig;
use crate::common::identity::InstanceIdentity;
use crate::common::messages::AnnounceMessage;

/// Probe the network for a running server.
///
/// The socket lives only for the duration of the call.
///
/// # Returns
/// - `Ok(ElectionOutcome)`: resolved exactly once, by response or by timeout
/// - `Err`: the probe socket could not be opened
pub async fn find_peer(
    profile: &NetworkProfile,
    identity: &InstanceIdentity,
    settings: &DiscoveryConfig,
) -> Result<ElectionOutcome> {
    let socket = bind_broadcast(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0), false)?;
    let listener = match bind_broadcast(
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port),
        true,
    ) {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!(
                "⚠️  Cannot listen on discovery port {}, relying on probe answers: {:#}",
                settings.port, e
            );
            None
        }
    };
    let targets = profile.probe_targets(settings.port);

    info!(
        "📡 Looking for a running queue server ({} probes to {} targets, {}ms timeout)",
        settings.probe_retries,
        targets.len(),
        settings.probe_timeout_ms
    );

    let probing = async {
        send_probes(&socket, &targets, settings.probe_retries, settings.probe_interval()).await;
        // Keep listening until the timeout, a late answer still counts
        std::future::pending::<()>().await
    };

    let overheard = async {
        match &listener {
            Some(listener) => wait_for_announce(listener, identity).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        address = wait_for_announce(&socket, identity) => ElectionOutcome::PeerFound(address),
        address = overheard => ElectionOutcome::PeerFound(address),
        _ = tokio::time::sleep(settings.probe_timeout()) => ElectionOutcome::NoPeerFound,
        _ = probing => unreachable!("probe loop never completes"),
    };

    match &outcome {
        ElectionOutcome::PeerFound(address) => info!("👑 Found running queue server at {}", address),
        ElectionOutcome::NoPeerFound => info!("⏰ No queue server answered"),
    }

    Ok(outcome)
}

async fn send_probes(socket: &UdpSocket, targets: &[SocketAddr], rounds: u32, interval: Duration) {
    let probe = AnnounceMessage::WhoIs.to_bytes();

    for round in 0..rounds {
        if round > 0 {
            tokio::time::sleep(interval).await;
        }
        debug!("WHO_IS round {}/{}", round + 1, rounds);

        for target in targets {
            if let Err(e) = socket.send_to(&probe, target).await {
                debug!("Probe to {} failed: {}", target, e);
            }
        }
    }
}

/// Resolve with the sender address of the first ANNOUNCE that is not our own.
async fn wait_for_announce(socket: &UdpSocket, identity: &InstanceIdentity) -> Ipv4Addr {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("⚠️  Discovery receive error: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        match AnnounceMessage::from_bytes(&buf[..len]) {
            Ok(AnnounceMessage::Announce {
                address,
                identity: sender,
            }) => {
                if sender == *identity {
                    debug!("Ignoring our own announcement from {}", from);
                    continue;
                }
                debug!("ANNOUNCE from {} ({}) identity {}", address, from, sender);
                return address;
            }
            Ok(AnnounceMessage::WhoIs) => debug!("Ignoring WHO_IS from {}", from),
            Err(e) => debug!("Ignoring malformed datagram from {}: {}", from, e),
        }
    }
}
