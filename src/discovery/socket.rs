//! UDP socket setup shared by the discovery client and the announcer.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Largest discovery datagram we bother reading.
pub const MAX_DATAGRAM: usize = 512;

/// Bind a broadcast-capable UDP socket and hand it to tokio.
///
/// `reuse` lets several instances on one host share the discovery port.
/// Must be called from inside a tokio runtime.
pub fn bind_broadcast(addr: SocketAddrV4, reuse: bool) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create socket")?;

    if reuse {
        socket
            .set_reuse_address(true)
            .context("Failed to set reuse address")?;
    }
    socket
        .set_broadcast(true)
        .context("Failed to enable broadcast")?;
    socket
        .set_nonblocking(true)
        .context("Failed to make socket non-blocking")?;
    socket
        .bind(&SocketAddr::V4(addr).into())
        .with_context(|| format!("Failed to bind UDP socket to {}", addr))?;

    UdpSocket::from_std(socket.into()).context("Failed to register socket with tokio")
}
