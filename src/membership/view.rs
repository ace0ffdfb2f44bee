use log::{debug, warn};
use std::collections::BTreeMap;

use super::types::{PeerId, Snapshot, Status, StatusKind};

/// Outcome of merging one incoming entry that changed the local view.
///
/// The view itself never touches timers; the node turns these into
/// escalation timers and membership events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeEffect {
    // First observation of a peer
    Discovered(Status),
    // A second source suspects a peer we believed alive: arm escalation
    SuspicionConfirmed(Status),
    // A suspected peer proved itself alive with a newer incarnation
    Refuted(Status),
    Died(Status),
    // Same kind, newer incarnation
    Updated(Status),
    // Someone suspected us and we bumped our incarnation
    SelfRefuted { incarnation: u64 },
}

// How a single incoming entry resolves against the local one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    KeepLocal,
    Adopt,
}

/// The local node's belief about every member it has heard of, itself
/// included.
///
/// Entries are never removed. A DEAD entry stays as a tombstone so stale
/// ALIVE gossip cannot bring the peer back.
#[derive(Debug, Clone)]
pub struct MembershipView {
    local_id: PeerId,
    incarnation: u64,
    members: BTreeMap<PeerId, Status>,
}

impl MembershipView {
    pub fn new(local_id: PeerId) -> Self {
        let mut members = BTreeMap::new();
        members.insert(
            local_id.clone(),
            Status::alive(local_id.clone(), 0, local_id.clone()),
        );

        Self {
            local_id,
            incarnation: 0,
            members,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Our own incarnation number.
    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Status> {
        self.members.get(peer)
    }

    pub fn kind_of(&self, peer: &PeerId) -> Option<StatusKind> {
        self.members.get(peer).map(|status| status.kind)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &Status)> {
        self.members.iter()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.members.clone()
    }

    /// Peers other than ourselves currently believed alive.
    pub fn reachable_peers(&self) -> Vec<PeerId> {
        self.members
            .values()
            .filter(|status| status.owner != self.local_id && status.is_alive())
            .map(|status| status.owner.clone())
            .collect()
    }

    /// Re-assert our own liveness at the current incarnation.
    pub fn refresh_self(&mut self) {
        let status = Status::alive(
            self.local_id.clone(),
            self.incarnation,
            self.local_id.clone(),
        );
        self.members.insert(self.local_id.clone(), status);
    }

    /// Locally suspect `peer` at the incarnation it last advertised.
    ///
    /// Returns the new status, or `None` when the peer is ourselves or already
    /// DEAD.
    pub fn suspect(&mut self, peer: &PeerId) -> Option<Status> {
        if *peer == self.local_id {
            return None;
        }

        let incarnation = match self.members.get(peer) {
            Some(status) if status.is_dead() => return None,
            Some(status) => status.incarnation,
            None => 0,
        };

        let status = Status::suspected(peer.clone(), incarnation, self.local_id.clone());
        self.members.insert(peer.clone(), status.clone());
        Some(status)
    }

    /// Declare `peer` dead. Returns `None` if it was already dead or is us.
    pub fn declare_dead(&mut self, peer: &PeerId) -> Option<Status> {
        if *peer == self.local_id {
            return None;
        }

        let incarnation = match self.members.get(peer) {
            Some(status) if status.is_dead() => return None,
            Some(status) => status.incarnation,
            None => 0,
        };

        let status = Status::dead(peer.clone(), incarnation, self.local_id.clone());
        self.members.insert(peer.clone(), status.clone());
        Some(status)
    }

    /// Merge a remote snapshot into the view, entry by entry.
    pub fn merge(&mut self, incoming: &Snapshot) -> Vec<MergeEffect> {
        let mut effects = Vec::new();

        for (peer, status) in incoming {
            if *peer != status.owner {
                warn!(
                    "Skipping malformed entry: key {} describes {}",
                    peer, status.owner
                );
                continue;
            }

            if let Some(effect) = self.merge_entry(status) {
                effects.push(effect);
            }
        }

        effects
    }

    fn merge_entry(&mut self, incoming: &Status) -> Option<MergeEffect> {
        if incoming.owner == self.local_id {
            return self.merge_self_entry(incoming);
        }

        let local = self.members.get(&incoming.owner);
        let previous = local.map(|status| status.kind);

        if resolve(local, incoming) == Resolution::KeepLocal {
            return None;
        }

        let mut adopted = incoming.clone();
        adopted.reporter = self.local_id.clone();
        self.members.insert(adopted.owner.clone(), adopted.clone());

        debug!(
            "Adopted {} for {} (was {:?})",
            adopted, adopted.owner, previous
        );

        let effect = match (previous, adopted.kind) {
            (None, _) => MergeEffect::Discovered(adopted),
            (Some(StatusKind::Alive), StatusKind::Suspected) => {
                MergeEffect::SuspicionConfirmed(adopted)
            }
            (Some(StatusKind::Suspected), StatusKind::Alive) => MergeEffect::Refuted(adopted),
            (Some(kind), StatusKind::Dead) if kind != StatusKind::Dead => {
                MergeEffect::Died(adopted)
            }
            _ => MergeEffect::Updated(adopted),
        };

        Some(effect)
    }

    // Claims about ourselves: only suspicion (refute) and death are honoured
    fn merge_self_entry(&mut self, incoming: &Status) -> Option<MergeEffect> {
        match incoming.kind {
            StatusKind::Suspected => {
                // An older suspicion has already been refuted
                if incoming.incarnation < self.incarnation {
                    return None;
                }

                self.incarnation = self.incarnation.max(incoming.incarnation) + 1;
                self.refresh_self();

                Some(MergeEffect::SelfRefuted {
                    incarnation: self.incarnation,
                })
            }
            StatusKind::Dead => {
                let local = self.members.get(&self.local_id);
                if resolve(local, incoming) == Resolution::KeepLocal {
                    return None;
                }

                warn!("{} has been declared dead by the cluster", self.local_id);

                let mut adopted = incoming.clone();
                adopted.reporter = self.local_id.clone();
                self.members.insert(self.local_id.clone(), adopted.clone());
                Some(MergeEffect::Died(adopted))
            }
            StatusKind::Alive => None,
        }
    }
}

fn resolve(local: Option<&Status>, incoming: &Status) -> Resolution {
    let Some(local) = local else {
        return Resolution::Adopt;
    };

    let newer = incoming.incarnation > local.incarnation;

    match (local.kind, incoming.kind) {
        (StatusKind::Dead, StatusKind::Dead) => pick(newer),
        (_, StatusKind::Dead) => Resolution::Adopt,
        (StatusKind::Dead, _) => Resolution::KeepLocal,
        (StatusKind::Alive, StatusKind::Suspected) => pick(newer),
        (StatusKind::Alive, StatusKind::Alive) => pick(newer),
        (StatusKind::Suspected, StatusKind::Alive) => pick(newer),
        (StatusKind::Suspected, StatusKind::Suspected) => pick(newer),
    }
}

// Ties always favour the local entry
fn pick(incoming_is_newer: bool) -> Resolution {
    if incoming_is_newer {
        Resolution::Adopt
    } else {
        Resolution::KeepLocal
    }
}
