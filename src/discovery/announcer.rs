//! # Discovery Announcer
//!
//! Runs on the elected server for the rest of its life:
//!
//! - answers every WHO_IS with a unicast ANNOUNCE to the prober
//! - broadcasts its own ANNOUNCE every `announce_interval`, so instances that
//!   start probing later hear about it even if their WHO_IS was lost
//! - reports every ANNOUNCE carrying a foreign identity as a conflicting peer
//!
//! Deciding what to do about a conflict is left to the receiver of the
//! conflict channel.

use anyhow::Result;
use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::scanner::NetworkProfile;
use super::socket::{bind_broadcast, MAX_DATAGRAM};
use crate::common::config::DiscoveryConfig;
use crate::common::identity::InstanceIdentity;
use crate::common::messages::AnnounceMessage;

/// Another instance announcing itself as the active server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAnnouncement {
    /// Address the peer reports for itself
    pub address: Ipv4Addr,
    /// The peer's instance identity
    pub identity: InstanceIdentity,
    /// Where the datagram actually came from
    pub from: SocketAddr,
}

/// Handle to the running announcer tasks.
///
/// Dropping the handle stops the announcer.
pub struct Announcer {
    local_addr: SocketAddr,
    tasks: Mutex<Option<AnnouncerTasks>>,
}

struct AnnouncerTasks {
    responder: JoinHandle<()>,
    periodic: JoinHandle<()>,
}

impl Announcer {
    /// Bind the discovery port and start answering and announcing.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(
        profile: &NetworkProfile,
        identity: InstanceIdentity,
        settings: &DiscoveryConfig,
        conflicts: mpsc::UnboundedSender<PeerAnnouncement>,
    ) -> Result<Self> {
        let socket = Arc::new(bind_broadcast(
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port),
            true,
        )?);
        let local_addr = socket.local_addr()?;
        let announce = AnnounceMessage::announce(profile.primary, identity).to_bytes();

        info!(
            "📣 Announcing as {} (identity {}) on UDP {}",
            profile.primary, identity, local_addr
        );

        let responder = tokio::spawn(respond(
            socket.clone(),
            identity,
            announce.clone(),
            conflicts,
        ));

        let targets = profile.announce_targets(settings.port);
        let interval = settings.announce_interval();
        let periodic = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for target in &targets {
                    if let Err(e) = socket.send_to(&announce, target).await {
                        debug!("Announce to {} failed: {}", target, e);
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            tasks: Mutex::new(Some(AnnouncerTasks {
                responder,
                periodic,
            })),
        })
    }

    /// Address of the discovery listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel the periodic timer and the listener, releasing the socket.
    /// Safe to call any number of times.
    pub fn stop(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(tasks) = tasks {
            tasks.periodic.abort();
            tasks.responder.abort();
            info!("🔇 Announcer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn respond(
    socket: Arc<UdpSocket>,
    identity: InstanceIdentity,
    announce: Vec<u8>,
    conflicts: mpsc::UnboundedSender<PeerAnnouncement>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("⚠️  Announcer receive error: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                continue;
            }
        };

        match AnnounceMessage::from_bytes(&buf[..len]) {
            Ok(AnnounceMessage::WhoIs) => {
                debug!("WHO_IS from {}, answering", from);
                if let Err(e) = socket.send_to(&announce, from).await {
                    warn!("⚠️  Failed to answer WHO_IS from {}: {}", from, e);
                }
            }
            Ok(AnnounceMessage::Announce {
                address,
                identity: sender,
            }) => {
                if sender == identity {
                    continue;
                }
                debug!("ANNOUNCE from {} ({}) identity {}", address, from, sender);
                // Nobody listening any more means we are already shutting down
                let _ = conflicts.send(PeerAnnouncement {
                    address,
                    identity: sender,
                    from,
                });
            }
            Err(e) => debug!("Ignoring malformed datagram from {}: {}", from, e),
        }
    }
}
