use log::debug;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

use super::{PendingDirectProbe, SwimNode};
use crate::membership::{PeerId, StatusKind};
use crate::message::{CorrelationId, Message, Probe, ProbeKind, ProbeResponse};
use crate::timeout::{TimeoutContext, Timer};
use crate::transport::Transport;

impl<T: Transport, C: Timer> SwimNode<T, C> {
    // Peers the periodic loop may probe, recomputed on every round
    pub(super) fn probe_candidates(&self) -> Vec<PeerId> {
        let mut candidates: BTreeSet<PeerId> = self.config.contact_peers.iter().cloned().collect();
        if self.config.probe_discovered_peers {
            candidates.extend(self.view.iter().map(|(peer, _)| peer.clone()));
        }

        candidates
            .into_iter()
            .filter(|peer| *peer != self.config.local_id)
            .filter(|peer| self.view.kind_of(peer) != Some(StatusKind::Dead))
            .collect()
    }

    pub(super) fn probe_random_peer(&mut self) {
        let candidates = self.probe_candidates();
        let Some(target) = candidates.choose(&mut self.rng).cloned() else {
            debug!("{} has nobody to probe", self.config.local_id);
            return;
        };

        // Never gossip our own death
        self.view.refresh_self();

        let correlation = CorrelationId::new();
        let probe = Probe {
            sender: self.config.local_id.clone(),
            kind: ProbeKind::Direct,
            correlation,
            snapshot: self.view.snapshot(),
        };
        self.send(&target, Message::Probe(probe));

        let timeout = self.timeouts.schedule_once(
            &mut self.timer,
            self.config.probe_timeout,
            TimeoutContext::DirectProbe {
                target: target.clone(),
                correlation,
            },
        );
        self.pending_probes
            .insert(correlation, PendingDirectProbe { target, timeout });
    }

    // Direct or relayed, a probe is answered the same way
    pub(super) fn on_probe(&mut self, probe: Probe) {
        debug!(
            "{} probed by {} ({:?})",
            self.config.local_id, probe.sender, probe.kind
        );
        self.merge_snapshot(&probe.snapshot);
        self.view.refresh_self();

        let response = ProbeResponse {
            sender: self.config.local_id.clone(),
            kind: probe.kind,
            correlation: probe.correlation,
            snapshot: self.view.snapshot(),
        };
        self.send(&probe.sender, Message::Response(response));
    }

    pub(super) fn on_response(&mut self, response: ProbeResponse) {
        match response.kind {
            ProbeKind::Direct => self.on_direct_response(response),
            ProbeKind::Relayed => self.on_relayed_response(response),
        }
    }

    fn on_direct_response(&mut self, response: ProbeResponse) {
        let Some(pending) = self.pending_probes.remove(&response.correlation) else {
            debug!(
                "{} ignoring unexpected response {} from {}",
                self.config.local_id, response.correlation, response.sender
            );
            return;
        };

        if pending.target != response.sender {
            debug!(
                "{} got the response for {} from {}",
                self.config.local_id, pending.target, response.sender
            );
        }

        self.timeouts.cancel(&mut self.timer, pending.timeout);
        self.merge_snapshot(&response.snapshot);
    }
}
