use log::{debug, info};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::time::Duration;

use super::{PendingIndirectProbe, SwimNode};
use crate::logging;
use crate::membership::{MembershipEvent, PeerId, StatusKind};
use crate::message::{CorrelationId, Message, ProbeRelayRequest, ProbeResponse};
use crate::timeout::{TimeoutContext, Timer};
use crate::transport::Transport;

impl<T: Transport, C: Timer> SwimNode<T, C> {
    pub(super) fn on_direct_timeout(&mut self, target: PeerId, correlation: CorrelationId) {
        // A response may have raced the timeout
        let Some(pending) = self.pending_probes.remove(&correlation) else {
            return;
        };
        debug!(
            "{} got no response from {}",
            self.config.local_id, pending.target
        );
        debug_assert_eq!(pending.target, target);

        self.begin_indirect_probe(pending.target);
    }

    /// Suspect `suspect` and ask up to k reachable peers to probe it for us.
    pub(super) fn begin_indirect_probe(&mut self, suspect: PeerId) {
        if self.suspicions.contains_key(&suspect) {
            debug!(
                "{} already tracking suspect {}",
                self.config.local_id, suspect
            );
            return;
        }

        let previous = self.view.kind_of(&suspect);
        let Some(status) = self.view.suspect(&suspect) else {
            return;
        };
        logging::log_status_change(&self.config.local_id, previous, &status);
        if previous != Some(StatusKind::Suspected) {
            self.events.push(MembershipEvent::MemberSuspected(status));
        }

        let candidates: Vec<PeerId> = self
            .view
            .reachable_peers()
            .into_iter()
            .filter(|peer| *peer != suspect)
            .collect();
        let relay_peers: Vec<PeerId> = candidates
            .choose_multiple(&mut self.rng, self.config.indirect_fanout)
            .cloned()
            .collect();

        let correlation = CorrelationId::new();
        for relay in &relay_peers {
            let request = ProbeRelayRequest {
                sender: self.config.local_id.clone(),
                suspect: suspect.clone(),
                correlation,
            };
            self.send(relay, Message::RelayRequest(request));
        }

        if relay_peers.is_empty() {
            info!(
                "{} has no relay peers for {}, waiting out the escalation timeout",
                self.config.local_id, suspect
            );
        }

        let window = self.config.indirect_escalation_timeout;
        self.track_suspicion(suspect, relay_peers.into_iter().collect(), correlation, window);
    }

    /// Arm the escalation timeout for `suspect`, replacing any earlier one.
    pub(super) fn track_suspicion(
        &mut self,
        suspect: PeerId,
        relay_peers: HashSet<PeerId>,
        correlation: CorrelationId,
        window: Duration,
    ) {
        self.stop_tracking(&suspect);

        let timeout = self.timeouts.schedule_once(
            &mut self.timer,
            window,
            TimeoutContext::Escalation {
                suspect: suspect.clone(),
                correlation,
            },
        );
        self.suspicions.insert(
            suspect,
            PendingIndirectProbe {
                relay_peers,
                correlation,
                timeout,
            },
        );
    }

    /// Forget `suspect` and cancel its escalation timeout.
    pub(super) fn stop_tracking(&mut self, suspect: &PeerId) -> bool {
        match self.suspicions.remove(suspect) {
            Some(pending) => {
                self.timeouts.cancel(&mut self.timer, pending.timeout);
                true
            }
            None => false,
        }
    }

    pub(super) fn on_escalation_timeout(&mut self, suspect: PeerId, correlation: CorrelationId) {
        match self.suspicions.get(&suspect) {
            Some(pending) if pending.correlation == correlation => {}
            _ => return,
        }
        self.suspicions.remove(&suspect);

        let previous = self.view.kind_of(&suspect);
        if let Some(status) = self.view.declare_dead(&suspect) {
            logging::log_status_change(&self.config.local_id, previous, &status);
            self.events.push(MembershipEvent::MemberDead(status));
        }
    }

    /// A relay reported that our suspect answered. Returns `false` if the
    /// response does not belong to any suspicion we track.
    pub(super) fn on_relayed_ack(&mut self, response: &ProbeResponse) -> bool {
        let suspect = self
            .suspicions
            .iter()
            .find(|(_, pending)| pending.correlation == response.correlation)
            .map(|(suspect, _)| suspect.clone());
        let Some(suspect) = suspect else {
            return false;
        };

        info!(
            "{}: {} answered a relayed probe via {}",
            self.config.local_id, suspect, response.sender
        );
        self.stop_tracking(&suspect);
        self.merge_snapshot(&response.snapshot);
        true
    }
}
