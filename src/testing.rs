//! Testing tools for the membership protocol
//!
//! This module provides in-memory stand-ins for the transport and the timer
//! service, plus `SimCluster`, which runs several nodes against one virtual
//! clock. Messages are delivered instantly and in order unless the sender or
//! the receiver is isolated, or the link between them is blocked.

use log::trace;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::membership::{PeerId, Status, StatusKind};
use crate::message::Message;
use crate::node::{Event, NodeConfig, SwimNode};
use crate::timeout::{Timeout, TimeoutId, Timer};
use crate::transport::Transport;

/// Keeps every message sent, in order.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Vec<(PeerId, Message)>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[(PeerId, Message)] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, to: &PeerId, message: Message) {
        self.sent.push((to.clone(), message));
    }
}

#[derive(Debug, Clone)]
struct Scheduled {
    due: Duration,
    period: Option<Duration>,
    timeout: Timeout,
}

/// Timer service driven by hand against a virtual clock.
#[derive(Debug, Default)]
pub struct ManualTimer {
    now: Duration,
    scheduled: Vec<Scheduled>,
    cancelled: Vec<TimeoutId>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn set_now(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.scheduled.iter().map(|entry| entry.due).min()
    }

    /// Take the earliest timeout due no later than `until`, advancing the
    /// clock to its due time. Periodic timeouts are rescheduled.
    pub fn pop_due(&mut self, until: Duration) -> Option<Timeout> {
        let (index, _) = self
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.due <= until)
            .min_by_key(|(_, entry)| entry.due)?;

        let entry = self.scheduled.remove(index);
        self.now = entry.due;
        if let Some(period) = entry.period {
            self.scheduled.push(Scheduled {
                due: entry.due + period,
                period: Some(period),
                timeout: entry.timeout.clone(),
            });
        }
        Some(entry.timeout)
    }

    pub fn is_scheduled(&self, id: TimeoutId) -> bool {
        self.scheduled.iter().any(|entry| entry.timeout.id == id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    pub fn scheduled(&self) -> Vec<Timeout> {
        self.scheduled
            .iter()
            .map(|entry| entry.timeout.clone())
            .collect()
    }

    pub fn cancelled(&self) -> &[TimeoutId] {
        &self.cancelled
    }
}

impl Timer for ManualTimer {
    fn schedule_once(&mut self, delay: Duration, timeout: Timeout) {
        self.scheduled.push(Scheduled {
            due: self.now + delay,
            period: None,
            timeout,
        });
    }

    fn schedule_periodic(&mut self, initial_delay: Duration, period: Duration, timeout: Timeout) {
        self.scheduled.push(Scheduled {
            due: self.now + initial_delay,
            period: Some(period),
            timeout,
        });
    }

    fn cancel(&mut self, id: TimeoutId) {
        self.scheduled.retain(|entry| entry.timeout.id != id);
        self.cancelled.push(id);
    }
}

pub type SimNode = SwimNode<RecordingTransport, ManualTimer>;

// Guards against message storms in a broken protocol
const MAX_DELIVERY_ROUNDS: usize = 10_000;

/// Several nodes sharing one virtual clock and a lossless in-memory network.
#[derive(Default)]
pub struct SimCluster {
    nodes: BTreeMap<PeerId, SimNode>,
    now: Duration,
    isolated: HashSet<PeerId>,
    blocked: HashSet<(PeerId, PeerId)>,
    delivered: usize,
    dropped: usize,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, config: NodeConfig) -> &mut SimNode {
        let id = config.local_id.clone();
        let seed = self.nodes.len() as u64 + 1;
        let mut timer = ManualTimer::new();
        timer.set_now(self.now);
        let node = SwimNode::new(config, RecordingTransport::new(), timer).with_rng_seed(seed);
        self.nodes.insert(id.clone(), node);
        self.node_mut(&id)
    }

    pub fn node(&self, id: &PeerId) -> &SimNode {
        self.nodes
            .get(id)
            .unwrap_or_else(|| panic!("no node {} in the cluster", id))
    }

    pub fn node_mut(&mut self, id: &PeerId) -> &mut SimNode {
        self.nodes
            .get_mut(id)
            .unwrap_or_else(|| panic!("no node {} in the cluster", id))
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn start_all(&mut self) {
        for node in self.nodes.values_mut() {
            node.start();
        }
        self.deliver_all();
    }

    /// Cut a node off the network; its timers keep running.
    pub fn isolate(&mut self, id: &PeerId) {
        self.isolated.insert(id.clone());
    }

    pub fn heal(&mut self, id: &PeerId) {
        self.isolated.remove(id);
    }

    /// Drop traffic between `a` and `b` in both directions.
    pub fn block_link(&mut self, a: &PeerId, b: &PeerId) {
        self.blocked.insert((a.clone(), b.clone()));
        self.blocked.insert((b.clone(), a.clone()));
    }

    pub fn unblock_link(&mut self, a: &PeerId, b: &PeerId) {
        self.blocked.remove(&(a.clone(), b.clone()));
        self.blocked.remove(&(b.clone(), a.clone()));
    }

    fn can_deliver(&self, from: &PeerId, to: &PeerId) -> bool {
        self.nodes.contains_key(to)
            && !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.blocked.contains(&(from.clone(), to.clone()))
    }

    /// Deliver messages until the network is quiet.
    pub fn deliver_all(&mut self) {
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let mut outgoing = Vec::new();
            for (id, node) in self.nodes.iter_mut() {
                for (to, message) in node.transport_mut().take_sent() {
                    outgoing.push((id.clone(), to, message));
                }
            }
            if outgoing.is_empty() {
                return;
            }

            for (from, to, message) in outgoing {
                if !self.can_deliver(&from, &to) {
                    trace!("dropping message {} -> {}", from, to);
                    self.dropped += 1;
                    continue;
                }
                self.delivered += 1;
                self.node_mut(&to).handle(Event::from(message));
            }
        }
        panic!("network did not go quiet after {} rounds", MAX_DELIVERY_ROUNDS);
    }

    /// Run every timeout due within the next `by`, in due order.
    pub fn advance(&mut self, by: Duration) {
        let until = self.now + by;

        loop {
            let next = self
                .nodes
                .iter()
                .filter_map(|(id, node)| node.timer().next_due().map(|due| (due, id.clone())))
                .filter(|(due, _)| *due <= until)
                .min();
            let Some((due, id)) = next else {
                break;
            };

            self.set_clock(due);
            let node = self.node_mut(&id);
            if let Some(timeout) = node.timer_mut().pop_due(until) {
                node.handle(Event::TimeoutFired(timeout));
            }
            self.deliver_all();
        }

        self.set_clock(until);
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    fn set_clock(&mut self, now: Duration) {
        self.now = now;
        for node in self.nodes.values_mut() {
            node.timer_mut().set_now(now);
        }
    }

    /// What `observer` believes about `subject`.
    pub fn status(&self, observer: &PeerId, subject: &PeerId) -> Option<Status> {
        self.node(observer).view().get(subject).cloned()
    }

    pub fn kind(&self, observer: &PeerId, subject: &PeerId) -> Option<StatusKind> {
        self.node(observer).view().kind_of(subject)
    }
}
