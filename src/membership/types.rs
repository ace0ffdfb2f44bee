use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identity of a cluster member.
///
/// The protocol only compares and hashes identities. The runtime treats the
/// inner string as a socket address unless its address book says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// Believed liveness of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    Alive,
    Suspected,
    Dead,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusKind::Alive => "ALIVE",
            StatusKind::Suspected => "SUSPECTED",
            StatusKind::Dead => "DEAD",
        };
        f.write_str(name)
    }
}

/// A status record about `owner`, as last decided by `reporter`.
///
/// The `incarnation` orders successive claims about the same owner. Only the
/// owner itself ever increases it, which is how a node refutes a suspicion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub incarnation: u64,
    pub owner: PeerId,
    pub reporter: PeerId,
}

impl Status {
    pub fn alive(owner: PeerId, incarnation: u64, reporter: PeerId) -> Self {
        Self {
            kind: StatusKind::Alive,
            incarnation,
            owner,
            reporter,
        }
    }

    pub fn suspected(owner: PeerId, incarnation: u64, reporter: PeerId) -> Self {
        Self {
            kind: StatusKind::Suspected,
            incarnation,
            owner,
            reporter,
        }
    }

    pub fn dead(owner: PeerId, incarnation: u64, reporter: PeerId) -> Self {
        Self {
            kind: StatusKind::Dead,
            incarnation,
            owner,
            reporter,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.kind == StatusKind::Alive
    }

    pub fn is_dead(&self) -> bool {
        self.kind == StatusKind::Dead
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.kind, self.incarnation, self.owner)
    }
}

/// Membership state as it travels on the wire: a full view or a partial delta.
pub type Snapshot = BTreeMap<PeerId, Status>;

// Changes in the local view, surfaced to applications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    MemberJoined(Status),
    MemberSuspected(Status),
    MemberAlive(Status),
    MemberDead(Status),
    Refuted { incarnation: u64 },
}
