//! Transport traits for datagram communication
//!
//! The netcode only assumes an unordered, lossy, at-most-once datagram
//! channel. [`UdpTransport`] is the production implementation;
//! [`MemoryNetwork`] provides in-process endpoints with configurable loss,
//! duplication, and reordering for tests and demos.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;
use ticknet_core::GameRng;
use tracing::trace;

use crate::codec::MAX_PACKET_BYTES;

/// Network address type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Socket address (IP + port)
    Socket(SocketAddr),
    /// Named address for in-process or custom transports
    Custom(String),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl From<String> for Address {
    fn from(addr: String) -> Self {
        Address::Custom(addr)
    }
}

impl From<&str> for Address {
    fn from(addr: &str) -> Self {
        Address::Custom(addr.to_string())
    }
}

/// Connectionless datagram transport
///
/// Owned by a single loop; nothing here blocks.
pub trait Transport {
    /// Error type for this transport
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a datagram to a target address
    fn send(&mut self, data: &[u8], target: &Address) -> Result<(), Self::Error>;

    /// Receive a datagram (non-blocking)
    ///
    /// Returns `Ok(None)` if no data is available.
    fn recv(&mut self) -> Result<Option<(Vec<u8>, Address)>, Self::Error>;

    /// Get the local address this transport is bound to
    fn local_addr(&self) -> Option<Address>;
}

/// Non-blocking UDP socket transport
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl UdpTransport {
    /// Bind a non-blocking UDP socket
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            buffer: vec![0; MAX_PACKET_BYTES],
        })
    }
}

impl Transport for UdpTransport {
    type Error = io::Error;

    fn send(&mut self, data: &[u8], target: &Address) -> io::Result<()> {
        match target {
            Address::Socket(addr) => {
                self.socket.send_to(data, addr)?;
                Ok(())
            }
            Address::Custom(name) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("UDP transport cannot reach custom address {}", name),
            )),
        }
    }

    fn recv(&mut self) -> io::Result<Option<(Vec<u8>, Address)>> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((len, from)) => Ok(Some((self.buffer[..len].to_vec(), from.into()))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> Option<Address> {
        self.socket.local_addr().ok().map(Address::from)
    }
}

/// Impairments applied to datagrams leaving one memory endpoint
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkConditions {
    /// Probability a datagram is dropped
    pub drop_rate: f64,
    /// Probability a delivered datagram is delivered twice
    pub duplicate_rate: f64,
    /// Probability a datagram jumps ahead of those already queued
    pub reorder_rate: f64,
}

impl LinkConditions {
    /// A perfect link
    pub fn perfect() -> Self {
        Self::default()
    }

    /// A link that drops everything
    pub fn severed() -> Self {
        Self {
            drop_rate: 1.0,
            ..Self::default()
        }
    }
}

type Inbox = VecDeque<(Vec<u8>, Address)>;

#[derive(Debug)]
struct NetworkState {
    inboxes: HashMap<Address, Inbox>,
    rng: GameRng,
}

/// In-process datagram network shared by several [`MemoryTransport`]s
///
/// Impairments are drawn from a seeded [`GameRng`], so a test replays the
/// same losses every run.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network with a fixed seed
    pub fn new(seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                inboxes: HashMap::new(),
                rng: GameRng::new(seed),
            })),
        }
    }

    /// Attach an endpoint at `address`
    pub fn endpoint(&self, address: impl Into<Address>, conditions: LinkConditions) -> MemoryTransport {
        let address = address.into();
        self.state
            .borrow_mut()
            .inboxes
            .entry(address.clone())
            .or_default();
        MemoryTransport {
            network: self.clone(),
            address,
            conditions,
        }
    }

    /// Datagrams waiting to be received at `address`
    pub fn in_flight(&self, address: &Address) -> usize {
        self.state
            .borrow()
            .inboxes
            .get(address)
            .map_or(0, VecDeque::len)
    }
}

/// One endpoint of a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: Address,
    conditions: LinkConditions,
}

impl MemoryTransport {
    /// Change the impairments applied to outgoing datagrams
    pub fn set_conditions(&mut self, conditions: LinkConditions) {
        self.conditions = conditions;
    }

    /// Current impairments
    pub fn conditions(&self) -> LinkConditions {
        self.conditions
    }
}

impl Transport for MemoryTransport {
    type Error = Infallible;

    fn send(&mut self, data: &[u8], target: &Address) -> Result<(), Infallible> {
        let mut state = self.network.state.borrow_mut();
        let state = &mut *state;

        if state.rng.chance(self.conditions.drop_rate) {
            trace!(from = %self.address, to = %target, "datagram dropped");
            return Ok(());
        }
        let copies = if state.rng.chance(self.conditions.duplicate_rate) {
            2
        } else {
            1
        };
        let reorder = state.rng.chance(self.conditions.reorder_rate);

        // Unknown targets behave like an unreachable host
        let Some(inbox) = state.inboxes.get_mut(target) else {
            trace!(from = %self.address, to = %target, "no endpoint at target");
            return Ok(());
        };
        for _ in 0..copies {
            let datagram = (data.to_vec(), self.address.clone());
            if reorder {
                inbox.push_front(datagram);
            } else {
                inbox.push_back(datagram);
            }
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<(Vec<u8>, Address)>, Infallible> {
        Ok(self
            .network
            .state
            .borrow_mut()
            .inboxes
            .get_mut(&self.address)
            .and_then(VecDeque::pop_front))
    }

    fn local_addr(&self) -> Option<Address> {
        Some(self.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from() {
        let socket: Address = "127.0.0.1:8080".parse::<SocketAddr>().unwrap().into();
        assert!(matches!(socket, Address::Socket(_)));

        let custom: Address = "client-1".into();
        assert!(matches!(custom, Address::Custom(_)));
        assert_eq!(custom.to_string(), "client-1");
    }

    #[test]
    fn test_memory_delivery() {
        let network = MemoryNetwork::new(1);
        let mut a = network.endpoint("a", LinkConditions::perfect());
        let mut b = network.endpoint("b", LinkConditions::perfect());

        a.send(b"hello", &"b".into()).unwrap();
        a.send(b"world", &"b".into()).unwrap();
        assert_eq!(network.in_flight(&"b".into()), 2);

        let (data, from) = b.recv().unwrap().unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(from, Address::from("a"));
        assert_eq!(b.recv().unwrap().unwrap().0, b"world");
        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn test_severed_link_drops_everything() {
        let network = MemoryNetwork::new(1);
        let mut a = network.endpoint("a", LinkConditions::severed());
        let mut b = network.endpoint("b", LinkConditions::perfect());

        for _ in 0..10 {
            a.send(b"lost", &"b".into()).unwrap();
        }
        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn test_duplication() {
        let network = MemoryNetwork::new(1);
        let mut a = network.endpoint(
            "a",
            LinkConditions {
                duplicate_rate: 1.0,
                ..LinkConditions::default()
            },
        );
        let _b = network.endpoint("b", LinkConditions::perfect());

        a.send(b"twice", &"b".into()).unwrap();
        assert_eq!(network.in_flight(&"b".into()), 2);
    }

    #[test]
    fn test_unknown_target_is_silently_lost() {
        let network = MemoryNetwork::new(1);
        let mut a = network.endpoint("a", LinkConditions::perfect());
        a.send(b"void", &"nobody".into()).unwrap();
        assert_eq!(network.in_flight(&"nobody".into()), 0);
    }

    #[test]
    fn test_udp_loopback() {
        let mut a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b_addr = b.local_addr().unwrap();

        assert!(b.recv().unwrap().is_none());
        a.send(b"ping", &b_addr).unwrap();

        let mut received = None;
        for _ in 0..200 {
            if let Some(datagram) = b.recv().unwrap() {
                received = Some(datagram);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (data, from) = received.expect("datagram over loopback");
        assert_eq!(data, b"ping");
        assert_eq!(Some(from), a.local_addr());

        assert!(a.send(b"x", &"custom".into()).is_err());
    }
}
