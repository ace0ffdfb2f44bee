//! The per-node SWIM state machine
//!
//! `SwimNode` owns the membership view, the timeout registry and every
//! pending-probe table. It is driven by one `Event` at a time and talks to the
//! outside world only through its `Transport` and `Timer`, so the same code
//! runs under the tokio runtime and under the deterministic test harness.
//!
//! - `probe`: periodic direct probing and probe/response handling
//! - `indirect`: suspicion, relay fan-out and escalation to DEAD
//! - `relay`: probing a suspect on behalf of another node

mod indirect;
mod probe;
mod relay;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::logging;
use crate::membership::{MembershipEvent, MembershipView, MergeEffect, PeerId, Snapshot, StatusKind};
use crate::message::{CorrelationId, Message, Probe, ProbeRelayRequest, ProbeResponse};
use crate::timeout::{Timeout, TimeoutContext, TimeoutId, TimeoutRegistry, Timer};
use crate::transport::Transport;

// Protocol defaults
pub const PROBE_INTERVAL: Duration = Duration::from_millis(3000);
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const INDIRECT_FANOUT: usize = 2;
pub const INDIRECT_ESCALATION_TIMEOUT: Duration = Duration::from_millis(5000);
pub const SUSPICION_TIMEOUT: Duration = Duration::from_millis(10000);
pub const RELAY_TIMEOUT: Duration = Duration::from_millis(2000);
pub const VIEW_DUMP_INTERVAL: Duration = Duration::from_millis(10000);

/// Protocol settings of one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub local_id: PeerId,
    // Peers probed by the periodic probe loop
    pub contact_peers: Vec<PeerId>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    // Relay requests sent when a direct probe times out
    pub indirect_fanout: usize,
    // Window after the relay fan-out before a suspect is declared dead
    pub indirect_escalation_timeout: Duration,
    // Window for suspicions learned through gossip
    pub suspicion_timeout: Duration,
    pub relay_timeout: Duration,
    pub view_dump_interval: Option<Duration>,
    // Also probe members learned through gossip, not just contacts
    pub probe_discovered_peers: bool,
}

impl NodeConfig {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            contact_peers: Vec::new(),
            probe_interval: PROBE_INTERVAL,
            probe_timeout: PROBE_TIMEOUT,
            indirect_fanout: INDIRECT_FANOUT,
            indirect_escalation_timeout: INDIRECT_ESCALATION_TIMEOUT,
            suspicion_timeout: SUSPICION_TIMEOUT,
            relay_timeout: RELAY_TIMEOUT,
            view_dump_interval: Some(VIEW_DUMP_INTERVAL),
            probe_discovered_peers: false,
        }
    }

    pub fn with_contacts(mut self, contacts: impl IntoIterator<Item = PeerId>) -> Self {
        self.contact_peers = contacts.into_iter().collect();
        self
    }
}

/// Everything that can happen to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ProbeReceived(Probe),
    ResponseReceived(ProbeResponse),
    RelayRequestReceived(ProbeRelayRequest),
    TimeoutFired(Timeout),
}

impl From<Message> for Event {
    fn from(message: Message) -> Self {
        match message {
            Message::Probe(probe) => Event::ProbeReceived(probe),
            Message::Response(response) => Event::ResponseReceived(response),
            Message::RelayRequest(request) => Event::RelayRequestReceived(request),
        }
    }
}

// A direct probe awaiting its response
#[derive(Debug, Clone)]
struct PendingDirectProbe {
    target: PeerId,
    timeout: TimeoutId,
}

// A suspect awaiting refutation or death
#[derive(Debug, Clone)]
struct PendingIndirectProbe {
    relay_peers: HashSet<PeerId>,
    correlation: CorrelationId,
    timeout: TimeoutId,
}

// A probe we relay for someone else
#[derive(Debug, Clone)]
struct RelayContext {
    requester: PeerId,
    suspect: PeerId,
    timeout: TimeoutId,
}

pub struct SwimNode<T: Transport, C: Timer> {
    config: NodeConfig,
    view: MembershipView,
    timeouts: TimeoutRegistry,
    transport: T,
    timer: C,
    rng: StdRng,
    pending_probes: HashMap<CorrelationId, PendingDirectProbe>,
    suspicions: HashMap<PeerId, PendingIndirectProbe>,
    relays: HashMap<CorrelationId, RelayContext>,
    periodic_probe: Option<TimeoutId>,
    view_dump: Option<TimeoutId>,
    events: Vec<MembershipEvent>,
}

impl<T: Transport, C: Timer> SwimNode<T, C> {
    pub fn new(config: NodeConfig, transport: T, timer: C) -> Self {
        let view = MembershipView::new(config.local_id.clone());
        Self {
            config,
            view,
            timeouts: TimeoutRegistry::new(),
            transport,
            timer,
            rng: StdRng::from_entropy(),
            pending_probes: HashMap::new(),
            suspicions: HashMap::new(),
            relays: HashMap::new(),
            periodic_probe: None,
            view_dump: None,
            events: Vec::new(),
        }
    }

    /// Make peer selection reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn local_id(&self) -> &PeerId {
        &self.config.local_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn view(&self) -> &MembershipView {
        &self.view
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn timer(&self) -> &C {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut C {
        &mut self.timer
    }

    pub fn is_running(&self) -> bool {
        self.periodic_probe.is_some() || self.view_dump.is_some()
    }

    /// Whether `peer` is being tracked towards an escalation to DEAD.
    pub fn is_tracking_suspect(&self, peer: &PeerId) -> bool {
        self.suspicions.contains_key(peer)
    }

    /// Relay peers asked to probe `suspect`, if it is being tracked.
    pub fn relay_peers_for(&self, suspect: &PeerId) -> Option<&HashSet<PeerId>> {
        self.suspicions
            .get(suspect)
            .map(|pending| &pending.relay_peers)
    }

    pub fn pending_probe_count(&self) -> usize {
        self.pending_probes.len()
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    pub fn live_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    /// Take the membership events accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<MembershipEvent> {
        std::mem::take(&mut self.events)
    }

    /// Arm the periodic timers.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        info!("{} starting...", self.config.local_id);

        // Nobody to talk to, nothing to time
        if self.config.contact_peers.is_empty() && !self.config.probe_discovered_peers {
            debug!("{} has no contact peers, staying idle", self.config.local_id);
            return;
        }

        self.periodic_probe = Some(self.timeouts.schedule_periodic(
            &mut self.timer,
            self.config.probe_interval,
            self.config.probe_interval,
            TimeoutContext::PeriodicProbe,
        ));

        if let Some(every) = self.config.view_dump_interval {
            self.view_dump = Some(self.timeouts.schedule_periodic(
                &mut self.timer,
                every,
                every,
                TimeoutContext::ViewDump,
            ));
        }
    }

    /// Cancel every outstanding timeout. The view is kept as is.
    pub fn stop(&mut self) {
        info!("{} stopping...", self.config.local_id);
        self.timeouts.cancel_all(&mut self.timer);
        self.periodic_probe = None;
        self.view_dump = None;
        self.pending_probes.clear();
        self.suspicions.clear();
        self.relays.clear();
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::ProbeReceived(probe) => self.on_probe(probe),
            Event::ResponseReceived(response) => self.on_response(response),
            Event::RelayRequestReceived(request) => self.on_relay_request(request),
            Event::TimeoutFired(timeout) => self.on_timeout(timeout),
        }
    }

    fn on_timeout(&mut self, timeout: Timeout) {
        // Cancelled or already handled
        let Some(context) = self.timeouts.fire(timeout.id) else {
            return;
        };

        match context {
            TimeoutContext::PeriodicProbe => self.probe_random_peer(),
            TimeoutContext::DirectProbe {
                target,
                correlation,
            } => self.on_direct_timeout(target, correlation),
            TimeoutContext::Escalation {
                suspect,
                correlation,
            } => self.on_escalation_timeout(suspect, correlation),
            TimeoutContext::Relay { correlation } => self.on_relay_timeout(correlation),
            TimeoutContext::ViewDump => logging::log_view(&self.view),
        }
    }

    /// Fold a remote snapshot into the view and act on what changed.
    pub fn merge_snapshot(&mut self, snapshot: &Snapshot) {
        let local = self.config.local_id.clone();

        for effect in self.view.merge(snapshot) {
            match effect {
                MergeEffect::Discovered(status) => {
                    logging::log_status_change(&local, None, &status);
                    self.events.push(MembershipEvent::MemberJoined(status));
                }
                MergeEffect::SuspicionConfirmed(status) => {
                    logging::log_status_change(&local, Some(StatusKind::Alive), &status);
                    let window = self.config.suspicion_timeout;
                    self.track_suspicion(
                        status.owner.clone(),
                        HashSet::new(),
                        CorrelationId::new(),
                        window,
                    );
                    self.events.push(MembershipEvent::MemberSuspected(status));
                }
                MergeEffect::Refuted(status) => {
                    logging::log_status_change(&local, Some(StatusKind::Suspected), &status);
                    self.stop_tracking(&status.owner);
                    self.events.push(MembershipEvent::MemberAlive(status));
                }
                MergeEffect::Died(status) => {
                    logging::log_status_change(&local, None, &status);
                    self.stop_tracking(&status.owner);
                    self.events.push(MembershipEvent::MemberDead(status));
                }
                MergeEffect::Updated(status) => {
                    logging::log_status_change(&local, Some(status.kind), &status);
                }
                MergeEffect::SelfRefuted { incarnation } => {
                    info!(
                        "{} refuted a suspicion, incarnation now {}",
                        local, incarnation
                    );
                    self.events.push(MembershipEvent::Refuted { incarnation });
                }
            }
        }
    }

    fn send(&mut self, to: &PeerId, message: Message) {
        debug!("{} -> {}: {:?}", self.config.local_id, to, MessageLabel(&message));
        self.transport.send(to, message);
    }
}

// Compact Debug for log lines; snapshots are too noisy
struct MessageLabel<'a>(&'a Message);

impl std::fmt::Debug for MessageLabel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Message::Probe(probe) => {
                write!(f, "Probe({:?}, {})", probe.kind, probe.correlation)
            }
            Message::Response(response) => {
                write!(f, "Response({:?}, {})", response.kind, response.correlation)
            }
            Message::RelayRequest(request) => {
                write!(f, "RelayRequest({}, {})", request.suspect, request.correlation)
            }
        }
    }
}
