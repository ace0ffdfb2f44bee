use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::membership::{PeerId, Snapshot};

// Largest payload that fits in a single UDP datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Correlates a probe with its response, and a relay request with the
/// relayed probe it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Whether a probe was sent on our own behalf or for a relay requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    Direct,
    Relayed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub sender: PeerId,
    pub kind: ProbeKind,
    pub correlation: CorrelationId,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub sender: PeerId,
    pub kind: ProbeKind,
    pub correlation: CorrelationId,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRelayRequest {
    pub sender: PeerId,
    pub suspect: PeerId,
    pub correlation: CorrelationId,
}

// Everything peers exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Probe(Probe),
    Response(ProbeResponse),
    RelayRequest(ProbeRelayRequest),
}

impl Message {
    pub fn sender(&self) -> &PeerId {
        match self {
            Message::Probe(probe) => &probe.sender,
            Message::Response(response) => &response.sender,
            Message::RelayRequest(request) => &request.sender,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self).context("Failed to encode message")?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            anyhow::bail!(
                "Encoded message is {} bytes, larger than a datagram ({})",
                bytes.len(),
                MAX_DATAGRAM_SIZE
            );
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("Failed to decode message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Status;

    #[test]
    fn test_probe_survives_the_wire() {
        let a = PeerId::from("127.0.0.1:7000");
        let mut snapshot = Snapshot::new();
        snapshot.insert(a.clone(), Status::alive(a.clone(), 3, a.clone()));

        let message = Message::Probe(Probe {
            sender: a.clone(),
            kind: ProbeKind::Relayed,
            correlation: CorrelationId::new(),
            snapshot,
        });

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.sender(), &a);
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(Message::decode(&[0xff, 0xff, 0xff]).is_err());
    }
}
