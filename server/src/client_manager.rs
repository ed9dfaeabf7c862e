//! Connection roster for the authoritative server
//!
//! Tracks which address owns which connection id, enforces the capacity
//! limit and notices clients that have gone silent. Commands themselves are
//! not buffered here; they go straight to the game inbox.

use log::info;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a client is considered gone
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connected client and its session bookkeeping
#[derive(Debug)]
pub struct Client {
    /// Connection id, also the player id in the simulation
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time any packet arrived from this client
    pub last_seen: Instant,
    /// Command frames received over the session
    pub frames_received: u64,
}

impl Client {
    /// Creates a client with the given id and network address
    ///
    /// The client starts out marked as recently active with no frames
    /// received.
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            frames_received: 0,
        }
    }

    /// Marks the client as active and counts the command frames it sent
    pub fn touch(&mut self, frames: usize) {
        self.last_seen = Instant::now();
        self.frames_received += frames as u64;
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have arrived from this client within
    /// `timeout`, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Connected clients keyed by connection id
///
/// Connection ids double as player ids in the simulation and are never
/// reused within one server run.
pub struct ClientManager {
    clients: BTreeMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    /// Creates a client manager with the specified capacity limit
    ///
    /// Uses [`CLIENT_TIMEOUT`] for silence detection. Connection ids start
    /// from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, CLIENT_TIMEOUT)
    }

    /// Creates a client manager with a custom silence timeout
    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to register a new connection
    ///
    /// Returns `Some(client_id)` on success, `None` when the server is at
    /// capacity. The id is associated with `addr` for response routing.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    /// Removes a client from the roster
    ///
    /// Returns true if the client was found and removed, false if it was
    /// already gone. Used for explicit disconnects and timeout cleanup alike.
    pub fn remove_client(&mut self, client_id: u32) -> bool {
        match self.clients.remove(&client_id) {
            Some(client) => {
                info!(
                    "Client {} disconnected after {} command frame(s)",
                    client.id, client.frames_received
                );
                true
            }
            None => false,
        }
    }

    /// Finds a connection id by network address
    ///
    /// Used to associate incoming packets with existing connections.
    /// Returns `None` if no client is connected from `addr`.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    /// Network address of a connected client
    pub fn addr_of(&self, client_id: u32) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Records activity from `client_id`. Returns false for unknown ids.
    pub fn touch(&mut self, client_id: u32, frames: usize) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch(frames);
                true
            }
            None => false,
        }
    }

    /// Removes and returns every client silent for longer than the timeout
    ///
    /// Should be called periodically by the server loop. The caller is
    /// responsible for removing the returned ids from the simulation.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(self.timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(*client_id);
        }
        timed_out
    }

    /// Id and address of every connected client, for broadcasting
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients.values().map(|client| (client.id, client.addr)).collect()
    }

    /// Number of connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(1, test_addr());
        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
        assert_eq!(client.frames_received, 0);
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr());
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch(3);
        assert!(!client.is_timed_out(Duration::from_secs(1)));
        assert_eq!(client.frames_received, 3);
    }

    #[test]
    fn test_add_client_and_capacity() {
        let mut manager = ClientManager::new(2);
        assert!(manager.is_empty());

        assert_eq!(manager.add_client(test_addr()), Some(1));
        assert_eq!(manager.add_client(test_addr2()), Some(2));
        assert_eq!(manager.add_client("127.0.0.1:8082".parse().unwrap()), None);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = ClientManager::new(2);
        let first = manager.add_client(test_addr()).unwrap();
        assert!(manager.remove_client(first));
        assert!(!manager.remove_client(first));
        assert_eq!(manager.add_client(test_addr()), Some(first + 1));
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = ClientManager::new(4);
        let id = manager.add_client(test_addr2()).unwrap();
        assert_eq!(manager.find_client_by_addr(test_addr2()), Some(id));
        assert_eq!(manager.find_client_by_addr(test_addr()), None);
        assert_eq!(manager.addr_of(id), Some(test_addr2()));
    }

    #[test]
    fn test_check_timeouts_removes_silent_clients() {
        let mut manager = ClientManager::with_timeout(4, Duration::from_millis(50));
        let stale = manager.add_client(test_addr()).unwrap();
        let fresh = manager.add_client(test_addr2()).unwrap();

        manager.clients.get_mut(&stale).unwrap().last_seen = Instant::now() - Duration::from_secs(1);
        assert!(manager.touch(fresh, 1));

        assert_eq!(manager.check_timeouts(), vec![stale]);
        assert_eq!(manager.len(), 1);
        assert!(!manager.touch(stale, 1));
    }

    #[test]
    fn test_get_client_addrs() {
        let mut manager = ClientManager::new(4);
        manager.add_client(test_addr());
        manager.add_client(test_addr2());
        assert_eq!(manager.get_client_addrs(), vec![(1, test_addr()), (2, test_addr2())]);
    }
}
