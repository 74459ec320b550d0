//! The human in front of the console.
//!
//! When this instance stands down the operator must learn where the active
//! server lives before the process exits.

use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Why this instance stood down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YieldReason {
    /// A running server answered the startup probe
    PeerDiscovered(Ipv4Addr),
    /// Another server announced itself while we were serving
    Conflict(Ipv4Addr),
    /// The service port was already taken
    BindFailed { address: String, error: String },
}

impl YieldReason {
    /// Address of the server the operator should use instead, if known.
    pub fn peer(&self) -> Option<Ipv4Addr> {
        match self {
            Self::PeerDiscovered(address) | Self::Conflict(address) => Some(*address),
            Self::BindFailed { .. } => None,
        }
    }
}

impl fmt::Display for YieldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerDiscovered(address) => {
                write!(f, "a queue server is already running at {}", address)
            }
            Self::Conflict(address) => {
                write!(f, "another queue server took over at {}", address)
            }
            Self::BindFailed { address, error } => {
                write!(f, "could not listen on {}: {}", address, error)
            }
        }
    }
}

/// Surface a yield to a human and wait until they have seen it.
pub trait Operator: Send + Sync {
    fn report(&self, reason: &YieldReason);

    /// Completes once the operator acknowledged the report.
    fn acknowledge(&self) -> impl Future<Output = ()> + Send;
}

/// Prints to the terminal and waits for a line on stdin.
pub struct ConsoleOperator {
    service_port: u16,
}

impl ConsoleOperator {
    pub fn new(service_port: u16) -> Self {
        Self { service_port }
    }
}

impl Operator for ConsoleOperator {
    fn report(&self, reason: &YieldReason) {
        println!();
        println!("⛔ This instance will not serve: {}.", reason);
        if let Some(peer) = reason.peer() {
            println!("👉 Admin   : http://{}:{}/admin.html", peer, self.service_port);
            println!("👉 Display : http://{}:{}/display.html", peer, self.service_port);
        }
    }

    async fn acknowledge(&self) {
        println!("Press Enter to exit.");
        let mut line = String::new();
        // EOF or a broken stdin counts as acknowledged
        let _ = BufReader::new(tokio::io::stdin()).read_line(&mut line).await;
    }
}
