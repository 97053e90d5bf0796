//! Connection registry for the sync server
//!
//! This module tracks every open client connection and what it listens to:
//! - Connection lifecycle (register, close, forced close on missed probes)
//! - Per-connection subscription sets keyed by cell address
//! - Liveness probing with a keepalive flag that only an ack restores
//! - Fan-out of cell updates to interested connections
//!
//! Subscriptions live on the connection entry, so removing a connection
//! removes it from every cell's subscriber set at once.

use log::{debug, info, warn};
use shared::{split_cell_address, ConnectionId, ServerMessage};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Represents one open connection and its subscriptions
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Cleared by every sweep, set again by a keepalive ack
    pub alive: bool,
    /// Full cell addresses (`base` or `base|key`) this connection listens to
    pub subscriptions: HashSet<String>,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            alive: true,
            subscriptions: HashSet::new(),
            sender,
        }
    }

    /// Queues a frame for this connection's writer task.
    ///
    /// Returns false once the writer has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Checks the dual interest rule: an exact subscription to `address`, or a
    /// subscription to its bare base address.
    pub fn is_interested(&self, address: &str) -> bool {
        if self.subscriptions.contains(address) {
            return true;
        }
        match split_cell_address(address) {
            (base, Some(_)) => self.subscriptions.contains(base),
            (_, None) => false,
        }
    }
}

/// Owns every open connection
///
/// The registry is owned by the server's event loop, which makes subscription
/// changes and the liveness sweep mutually exclusive without any locking.
pub struct ClientManager {
    clients: HashMap<ConnectionId, Client>,
    next_client_id: ConnectionId,
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry. Connection IDs start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a newly opened connection
    ///
    /// Returns Some(connection_id) if successful, None if the server is at
    /// capacity. The connection starts alive with no subscriptions.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            warn!("Rejecting connection from {}: server full", addr);
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Connection {} opened from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Removes a connection from the registry
    ///
    /// Dropping the entry drops its outbound sender, which lets the writer
    /// task close the socket. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Connection {} closed after {:.1}s",
                client.id,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    pub fn get(&self, client_id: &ConnectionId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Adds an address to a connection's subscription set
    pub fn subscribe(&mut self, client_id: ConnectionId, address: &str) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                if client.subscriptions.insert(address.to_string()) {
                    debug!("Connection {} now watching {}", client_id, address);
                }
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, client_id: ConnectionId, address: &str) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                if client.subscriptions.remove(address) {
                    debug!("Connection {} stopped watching {}", client_id, address);
                }
                true
            }
            None => false,
        }
    }

    /// Records a keepalive acknowledgment
    pub fn mark_alive(&mut self, client_id: ConnectionId) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.alive = true;
            true
        } else {
            false
        }
    }

    /// Runs one liveness sweep
    ///
    /// Connections that did not acknowledge the previous probe are removed and
    /// returned so the caller can fire leave notifications. Every surviving
    /// connection has its flag cleared and receives a fresh probe.
    pub fn sweep(&mut self) -> Vec<ConnectionId> {
        let dead: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| !client.alive)
            .map(|client| client.id)
            .collect();

        for client_id in &dead {
            warn!("Connection {} missed its keepalive probe, closing", client_id);
            self.remove_client(client_id);
        }

        for client in self.clients.values_mut() {
            client.alive = false;
            client.send(ServerMessage::keepalive_probe());
        }

        if !self.clients.is_empty() {
            debug!("Probed {} connections", self.clients.len());
        }

        dead
    }

    /// Sends a frame to one connection
    pub fn send_to(&self, client_id: ConnectionId, message: ServerMessage) -> bool {
        match self.clients.get(&client_id) {
            Some(client) => client.send(message),
            None => false,
        }
    }

    /// Connections interested in `address`, sorted by ID
    pub fn subscribers_of(&self, address: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| client.is_interested(address))
            .map(|client| client.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Pushes a cell update to every interested connection
    ///
    /// Returns the number of connections the update was queued for.
    pub fn broadcast_update(&self, address: &str, value: &serde_json::Value) -> usize {
        let sent = self
            .subscribers_of(address)
            .into_iter()
            .filter(|client_id| self.send_to(*client_id, ServerMessage::update(address, value.clone())))
            .count();

        debug!("Broadcasted {} update to {} connections", address, sent);
        sent
    }

    /// Returns the number of currently open connections
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
    use serde_json::json;
    use shared::ServerMessageKind;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn connect(manager: &mut ClientManager) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = manager.add_client(test_addr(), tx).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_add_client_starts_alive_without_subscriptions() {
        let mut manager = ClientManager::new(2);
        let (id, _rx) = connect(&mut manager);

        assert_eq!(id, 1);
        let client = manager.get(&id).unwrap();
        assert!(client.alive);
        assert!(client.subscriptions.is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let (_id, _rx) = connect(&mut manager);

        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(manager.add_client(test_addr(), tx).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        let (id, _rx) = connect(&mut manager);

        assert!(manager.remove_client(&id));
        assert!(!manager.remove_client(&id));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = ClientManager::new(4);
        let (first, _rx1) = connect(&mut manager);
        manager.remove_client(&first);
        let (second, _rx2) = connect(&mut manager);

        assert_ne!(first, second);
    }

    #[test]
    fn test_exact_and_base_interest() {
        let mut manager = ClientManager::new(4);
        let (exact, _rx1) = connect(&mut manager);
        let (base, _rx2) = connect(&mut manager);
        let (other, _rx3) = connect(&mut manager);

        manager.subscribe(exact, "room|g1");
        manager.subscribe(base, "room");
        manager.subscribe(other, "room|g2");

        assert_eq!(manager.subscribers_of("room|g1"), vec![exact, base]);
        assert_eq!(manager.subscribers_of("room"), vec![base]);
        assert_eq!(manager.subscribers_of("room|g2"), vec![base, other]);
    }

    #[test]
    fn test_unsubscribe_stops_updates() {
        let mut manager = ClientManager::new(2);
        let (id, mut rx) = connect(&mut manager);

        manager.subscribe(id, "gameEvents|g1");
        assert_eq!(manager.broadcast_update("gameEvents|g1", &json!(["a"])), 1);

        manager.unsubscribe(id, "gameEvents|g1");
        assert_eq!(manager.broadcast_update("gameEvents|g1", &json!(["a", "b"])), 0);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, ServerMessageKind::Update);
        assert_eq!(messages[0].value, Some(json!(["a"])));
    }

    #[test]
    fn test_sweep_probes_live_connections() {
        let mut manager = ClientManager::new(2);
        let (id, mut rx) = connect(&mut manager);

        let dead = manager.sweep();

        assert!(dead.is_empty());
        assert!(!manager.get(&id).unwrap().alive);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, ServerMessageKind::KeepaliveProbe);
    }

    #[test]
    fn test_acknowledged_connection_survives_sweeps() {
        let mut manager = ClientManager::new(2);
        let (id, _rx) = connect(&mut manager);

        for _ in 0..3 {
            assert!(manager.sweep().is_empty());
            assert!(manager.mark_alive(id));
        }
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unacknowledged_connection_is_removed_with_subscriptions() {
        let mut manager = ClientManager::new(2);
        let (id, _rx) = connect(&mut manager);
        manager.subscribe(id, "room|g1");

        assert!(manager.sweep().is_empty());
        let dead = manager.sweep();

        assert_eq!(dead, vec![id]);
        assert!(manager.get(&id).is_none());
        assert!(manager.subscribers_of("room|g1").is_empty());
        assert_eq!(manager.broadcast_update("room|g1", &json!({})), 0);
    }

    #[test]
    fn test_removed_client_closes_channel() {
        let mut manager = ClientManager::new(2);
        let (id, mut rx) = connect(&mut manager);

        manager.remove_client(&id);

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
