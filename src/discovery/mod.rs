//! # LAN Discovery and Single-Instance Election
//!
//! Keeps two queue servers from running on the same LAN.
//!
//! ```text
//! scanner::scan ──► client::find_peer ──► NoPeerFound ──► Announcer::start
//!                                    └──► PeerFound   ──► yield
//! ```
//!
//! ## Modules
//!
//! - [`scanner`]: local IPv4 addresses and broadcast targets
//! - [`client`]: WHO_IS probing with bounded retries and an overall timeout
//! - [`announcer`]: answers probes, announces periodically, reports conflicts
//! - [`socket`]: broadcast-capable UDP socket setup

pub mod announcer;
pub mod client;
pub mod scanner;
pub mod socket;

use std::net::Ipv4Addr;

pub use announcer::{Announcer, PeerAnnouncement};
pub use client::find_peer;
pub use scanner::{scan, NetworkProfile};

/// Result of one startup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Nobody answered before the timeout: this instance may serve
    NoPeerFound,
    /// A server is already running at this address
    PeerFound(Ipv4Addr),
}
