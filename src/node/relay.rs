use log::debug;

use super::{RelayContext, SwimNode};
use crate::message::{CorrelationId, Message, Probe, ProbeKind, ProbeRelayRequest, ProbeResponse};
use crate::timeout::{TimeoutContext, Timer};
use crate::transport::Transport;

impl<T: Transport, C: Timer> SwimNode<T, C> {
    pub(super) fn on_relay_request(&mut self, request: ProbeRelayRequest) {
        // Asked to probe ourselves: answer straight away
        if request.suspect == self.config.local_id {
            self.view.refresh_self();
            let response = ProbeResponse {
                sender: self.config.local_id.clone(),
                kind: ProbeKind::Relayed,
                correlation: request.correlation,
                snapshot: self.view.snapshot(),
            };
            self.send(&request.sender, Message::Response(response));
            return;
        }

        if self.relays.contains_key(&request.correlation) {
            debug!(
                "{} already relaying {}",
                self.config.local_id, request.correlation
            );
            return;
        }

        let probe = Probe {
            sender: self.config.local_id.clone(),
            kind: ProbeKind::Relayed,
            correlation: request.correlation,
            snapshot: self.view.snapshot(),
        };
        self.send(&request.suspect, Message::Probe(probe));

        let timeout = self.timeouts.schedule_once(
            &mut self.timer,
            self.config.relay_timeout,
            TimeoutContext::Relay {
                correlation: request.correlation,
            },
        );
        self.relays.insert(
            request.correlation,
            RelayContext {
                requester: request.sender,
                suspect: request.suspect,
                timeout,
            },
        );
    }

    pub(super) fn on_relayed_response(&mut self, response: ProbeResponse) {
        // We relayed this probe: pass the answer on to whoever asked
        if let Some(relay) = self.relays.remove(&response.correlation) {
            self.timeouts.cancel(&mut self.timer, relay.timeout);
            self.merge_snapshot(&response.snapshot);

            let forwarded = ProbeResponse {
                sender: self.config.local_id.clone(),
                kind: ProbeKind::Relayed,
                correlation: response.correlation,
                snapshot: self.view.snapshot(),
            };
            self.send(&relay.requester, Message::Response(forwarded));
            return;
        }

        if !self.on_relayed_ack(&response) {
            debug!(
                "{} ignoring unexpected relayed response {} from {}",
                self.config.local_id, response.correlation, response.sender
            );
        }
    }

    pub(super) fn on_relay_timeout(&mut self, correlation: CorrelationId) {
        if let Some(relay) = self.relays.remove(&correlation) {
            debug!(
                "{} gave up relaying to {} for {}",
                self.config.local_id, relay.suspect, relay.requester
            );
        }
    }
}
