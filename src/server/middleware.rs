//! # Server Middleware - Election and Lifecycle
//!
//! The middleware decides whether this process may serve at all, and tears
//! everything down again when it must stand down.
//!
//! ## State Machine
//!
//! ```text
//! Unelected ──probe──► NoPeerFound ──bind ok──► Announcing ──conflict──► Yielding
//!     │                      └────bind failed─────────────────────────► Yielding
//!     └──────probe──► PeerFound ──────────────────────────────────────► Yielding
//! ```
//!
//! The service port is bound only after the probe resolved `NoPeerFound`.
//! Binding earlier would let two instances serve at the same time.
//!
//! ## Race Resolution
//!
//! Two instances that start together can both time out and both reach
//! `Announcing`. Each then hears the other's periodic ANNOUNCE. The wire only
//! carries address and identity, so [`ConflictTracker`] decides from local
//! timing:
//!
//! ```text
//! we are new,     rival lower identity      -> yield now
//! we are new,     rival heard for a window  -> it was there first, yield
//! we are settled, rival is new              -> ignore, it yields
//! we are settled, rival settled and lower   -> yield once it outlasted a newcomer
//! ```
//!
//! A running server therefore keeps the LAN against a late joiner whatever
//! their identities, and two fresh servers settle it by identity.
//!
//! ## Shutdown
//!
//! Conflicts, service failures and shutdown requests all race to resolve one
//! [`ResolveOnce`] cell; only the first one is acted upon. Teardown then stops
//! the announcer and the service independently, so a wedged listener cannot
//! keep the discovery socket alive.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tokio::task::JoinHandle;

use super::counter::CounterService;
use super::operator::{Operator, YieldReason};
use super::web;
use crate::common::config::{AppConfig, DiscoveryConfig};
use crate::common::identity::InstanceIdentity;
use crate::common::once::ResolveOnce;
use crate::discovery::{self, Announcer, ElectionOutcome, NetworkProfile, PeerAnnouncement};

/// How long the service gets to finish in-flight requests on shutdown.
const SERVICE_STOP_GRACE: Duration = Duration::from_secs(2);

/// Where this process stands in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Unelected,
    Announcing,
    Yielding,
}

/// How [`ServerMiddleware::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stood down in favour of another server (or a taken port)
    Yielded(YieldReason),
    /// Served until asked to stop
    Stopped,
}

/// What ended the `Announcing` phase.
#[derive(Debug)]
enum Shutdown {
    Yield(YieldReason),
    Requested,
    ServiceFailed(String),
}

/// What the controller makes of one foreign ANNOUNCE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictVerdict {
    /// This instance must stand down
    Yield,
    /// A rival heard for the first time, expected to stand down
    NewRival,
    /// A rival already being watched
    KnownRival,
    /// Our own announcement
    Echo,
}

struct Rival {
    first_heard: Instant,
    last_heard: Instant,
    heard_as_newcomer: bool,
}

impl Rival {
    fn new(now: Instant, heard_as_newcomer: bool) -> Self {
        Self {
            first_heard: now,
            last_heard: now,
            heard_as_newcomer,
        }
    }
}

/// Settles announce conflicts for one `Announcing` phase.
pub struct ConflictTracker {
    own: InstanceIdentity,
    announcing_since: Instant,
    settle: Duration,
    announce_interval: Duration,
    rivals: HashMap<InstanceIdentity, Rival>,
}

impl ConflictTracker {
    pub fn new(
        own: InstanceIdentity,
        announcing_since: Instant,
        settings: &DiscoveryConfig,
    ) -> Self {
        Self {
            own,
            announcing_since,
            settle: settings.settle_window(),
            announce_interval: settings.announce_interval(),
            rivals: HashMap::new(),
        }
    }

    /// `false` while this instance is still a newcomer.
    pub fn is_settled(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.announcing_since) >= self.settle
    }

    /// Record an ANNOUNCE heard at `now` and decide whether to stand down.
    pub fn observe(&mut self, peer: &PeerAnnouncement, now: Instant) -> ConflictVerdict {
        if peer.identity == self.own {
            return ConflictVerdict::Echo;
        }

        let newcomer = !self.is_settled(now);
        if newcomer && peer.identity < self.own {
            return ConflictVerdict::Yield;
        }

        let settle = self.settle;
        let mut first = false;
        let rival = self.rivals.entry(peer.identity).or_insert_with(|| {
            first = true;
            Rival::new(now, newcomer)
        });
        // A rival that went quiet and came back is a new encounter
        if !first && now.saturating_duration_since(rival.last_heard) > settle {
            *rival = Rival::new(now, newcomer);
            first = true;
        }
        rival.last_heard = now;

        let persisted = now.saturating_duration_since(rival.first_heard);
        let outlasted = if rival.heard_as_newcomer {
            // A fresh server would have stood down by now
            persisted >= settle
        } else {
            // Leave a newcomer enough time to stand down first
            persisted >= settle + 3 * self.announce_interval && peer.identity < self.own
        };

        if outlasted {
            ConflictVerdict::Yield
        } else if first {
            ConflictVerdict::NewRival
        } else {
            ConflictVerdict::KnownRival
        }
    }
}

/// Election and lifecycle controller for one queue server process.
pub struct ServerMiddleware<O: Operator> {
    config: AppConfig,
    identity: InstanceIdentity,
    profile: NetworkProfile,
    counter: Arc<CounterService>,
    operator: O,
    role: RwLock<ServerRole>,
    service_addr: RwLock<Option<SocketAddr>>,
    shutdown: Notify,
}

impl<O: Operator> ServerMiddleware<O> {
    /// Scan the local network and create a controller with a fresh identity.
    pub fn new(config: AppConfig, operator: O) -> Self {
        let profile = discovery::scan(&config.discovery);
        Self::with_profile(config, profile, operator)
    }

    /// Create a controller for an already known network profile.
    pub fn with_profile(config: AppConfig, profile: NetworkProfile, operator: O) -> Self {
        Self {
            config,
            identity: InstanceIdentity::generate(),
            profile,
            counter: Arc::new(CounterService::new()),
            operator,
            role: RwLock::new(ServerRole::Unelected),
            service_addr: RwLock::new(None),
            shutdown: Notify::new(),
        }
    }

    pub fn identity(&self) -> InstanceIdentity {
        self.identity
    }

    pub fn counter(&self) -> Arc<CounterService> {
        self.counter.clone()
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub async fn role(&self) -> ServerRole {
        *self.role.read().await
    }

    /// Address of the service listener once bound.
    pub async fn service_address(&self) -> Option<SocketAddr> {
        *self.service_addr.read().await
    }

    /// Ask a running instance to stop serving. Remembered if called early.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Probe, then either serve until told otherwise or stand down.
    ///
    /// # Returns
    /// - `Ok(RunOutcome)`: how this instance ended
    /// - `Err`: the probe socket could not be opened
    pub async fn run(&self) -> Result<RunOutcome> {
        info!(
            "🚀 Queue server starting (identity {}, address {})",
            self.identity, self.profile.primary
        );

        let probe = discovery::find_peer(&self.profile, &self.identity, &self.config.discovery);
        let outcome = tokio::select! {
            outcome = probe => outcome?,
            _ = self.shutdown.notified() => {
                info!("👋 Stopped before the election finished");
                return Ok(RunOutcome::Stopped);
            }
        };

        if let ElectionOutcome::PeerFound(peer) = outcome {
            return Ok(self.stand_down(YieldReason::PeerDiscovered(peer)).await);
        }

        let address = self.config.server.listen_address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ Failed to bind to {}: {}", address, e);
                return Ok(self
                    .stand_down(YieldReason::BindFailed {
                        address,
                        error: e.to_string(),
                    })
                    .await);
            }
        };

        match self.serve(listener).await {
            Shutdown::Yield(reason) => Ok(self.stand_down(reason).await),
            Shutdown::Requested => {
                info!("👋 Queue server stopped");
                Ok(RunOutcome::Stopped)
            }
            Shutdown::ServiceFailed(e) => {
                error!("❌ Service stopped unexpectedly: {}", e);
                Ok(RunOutcome::Stopped)
            }
        }
    }

    /// The `Announcing` phase: serve and announce until something ends it.
    async fn serve(&self, listener: TcpListener) -> Shutdown {
        let local_addr = listener.local_addr().ok();

        let (trigger, resolution) = ResolveOnce::new();
        let trigger = Arc::new(trigger);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = web::router(self.counter.clone(), &self.config.server.static_dir);
        let service_trigger = trigger.clone();
        let service: JoinHandle<()> = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await;
            let reason = match result {
                Ok(()) => "listener closed".to_string(),
                Err(e) => e.to_string(),
            };
            service_trigger.resolve(Shutdown::ServiceFailed(reason));
        });

        let (conflict_tx, conflict_rx) = mpsc::unbounded_channel();
        let announcer = match Announcer::start(
            &self.profile,
            self.identity,
            &self.config.discovery,
            conflict_tx,
        ) {
            Ok(announcer) => Some(announcer),
            Err(e) => {
                error!("❌ Discovery announcer unavailable, serving without it: {:#}", e);
                None
            }
        };
        let tracker = ConflictTracker::new(self.identity, Instant::now(), &self.config.discovery);
        let watcher = tokio::spawn(watch_conflicts(tracker, conflict_rx, trigger.clone()));

        *self.service_addr.write().await = local_addr;
        self.set_role(ServerRole::Announcing).await;
        if let Some(addr) = local_addr {
            info!("✅ Queue server listening on http://{}", addr);
            info!("👉 Admin   : http://{}:{}/admin.html", self.profile.primary, addr.port());
            info!("👉 Display : http://{}:{}/display.html", self.profile.primary, addr.port());
        }

        let reason = tokio::select! {
            resolved = resolution.wait() => resolved.unwrap_or(Shutdown::Requested),
            _ = self.shutdown.notified() => Shutdown::Requested,
        };
        // Late conflicts and service exits become no-ops from here on
        trigger.resolve(Shutdown::Requested);

        if let Shutdown::Yield(_) = reason {
            self.set_role(ServerRole::Yielding).await;
        }

        // Each step runs regardless of how the previous one went
        if let Some(announcer) = &announcer {
            announcer.stop();
        }
        watcher.abort();
        stop_service(stop_tx, service).await;
        *self.service_addr.write().await = None;

        reason
    }

    async fn stand_down(&self, reason: YieldReason) -> RunOutcome {
        self.set_role(ServerRole::Yielding).await;
        warn!("⛔ Standing down: {}", reason);

        self.operator.report(&reason);
        tokio::select! {
            _ = self.operator.acknowledge() => {}
            _ = self.shutdown.notified() => {
                debug!("Shutdown requested, not waiting for the operator");
            }
        }

        RunOutcome::Yielded(reason)
    }

    async fn set_role(&self, role: ServerRole) {
        let mut current = self.role.write().await;
        if *current != role {
            info!("🗳️  Role {:?} -> {:?}", *current, role);
            *current = role;
        }
    }
}

/// Turn the first lost conflict into a yield.
async fn watch_conflicts(
    mut tracker: ConflictTracker,
    mut conflicts: mpsc::UnboundedReceiver<PeerAnnouncement>,
    trigger: Arc<ResolveOnce<Shutdown>>,
) {
    while let Some(peer) = conflicts.recv().await {
        match tracker.observe(&peer, Instant::now()) {
            ConflictVerdict::Yield => {
                warn!(
                    "⚔️  Server at {} (identity {}) keeps the LAN, yielding",
                    peer.address, peer.identity
                );
                trigger.resolve(Shutdown::Yield(YieldReason::Conflict(peer.address)));
                return;
            }
            ConflictVerdict::NewRival => info!(
                "📊 Server at {} (identity {}) also announces, expecting it to yield",
                peer.address, peer.identity
            ),
            ConflictVerdict::KnownRival | ConflictVerdict::Echo => {}
        }
    }
}

async fn stop_service(stop_tx: oneshot::Sender<()>, mut service: JoinHandle<()>) {
    // The service may already have exited on its own
    let _ = stop_tx.send(());

    if tokio::time::timeout(SERVICE_STOP_GRACE, &mut service)
        .await
        .is_err()
    {
        warn!("⚠️  Service did not stop within {:?}, aborting", SERVICE_STOP_GRACE);
        service.abort();
    }
}
