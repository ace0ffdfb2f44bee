use log::{debug, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::membership::PeerId;
use crate::message::Message;

/// Fire-and-forget delivery of protocol messages.
///
/// Delivery may silently fail; the protocol copes with loss through its
/// timeouts.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    fn send(&mut self, to: &PeerId, message: Message);
}

/// Maps peer identities to socket addresses.
///
/// Explicit entries win, then addresses learned from inbound datagrams, and
/// finally the identity itself parsed as `ip:port`.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    configured: HashMap<PeerId, SocketAddr>,
    learned: HashMap<PeerId, SocketAddr>,
}

impl AddressBook {
    pub fn new(configured: HashMap<PeerId, SocketAddr>) -> Self {
        Self {
            configured,
            learned: HashMap::new(),
        }
    }

    pub fn learn(&mut self, peer: &PeerId, addr: SocketAddr) {
        if self.configured.contains_key(peer) {
            return;
        }
        if self.learned.insert(peer.clone(), addr) != Some(addr) {
            debug!("Learned address {} for {}", addr, peer);
        }
    }

    pub fn resolve(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.configured
            .get(peer)
            .or_else(|| self.learned.get(peer))
            .copied()
            .or_else(|| peer.as_str().parse().ok())
    }
}

/// Sends each message as one bincode-encoded UDP datagram.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    addresses: AddressBook,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>, addresses: AddressBook) -> Self {
        Self { socket, addresses }
    }

    pub fn addresses_mut(&mut self) -> &mut AddressBook {
        &mut self.addresses
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, to: &PeerId, message: Message) {
        let Some(addr) = self.addresses.resolve(to) else {
            warn!("No address known for {}, dropping message", to);
            return;
        };

        let encoded = match message.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode message for {}: {:#}", to, e);
                return;
            }
        };

        // Non-blocking: WouldBlock (socket not yet writable, or its buffer
        // full) drops the datagram without retry, like any other UDP loss
        if let Err(e) = self.socket.try_send_to(&encoded, addr) {
            warn!("Failed to send to {} at {}: {}", to, addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_order() {
        let configured_addr: SocketAddr = "10.0.0.1:7946".parse().unwrap();
        let learned_addr: SocketAddr = "10.0.0.2:7946".parse().unwrap();
        let mut configured = HashMap::new();
        configured.insert(PeerId::from("node-a"), configured_addr);
        let mut book = AddressBook::new(configured);

        book.learn(&PeerId::from("node-a"), learned_addr);
        book.learn(&PeerId::from("node-b"), learned_addr);

        assert_eq!(book.resolve(&PeerId::from("node-a")), Some(configured_addr));
        assert_eq!(book.resolve(&PeerId::from("node-b")), Some(learned_addr));
        assert_eq!(
            book.resolve(&PeerId::from("127.0.0.1:9000")),
            Some("127.0.0.1:9000".parse().unwrap())
        );
        assert_eq!(book.resolve(&PeerId::from("node-c")), None);
    }
}
