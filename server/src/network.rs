//! Server network layer handling WebSocket connections and the event loop

use crate::client_manager::{ClientManager, ConnectionState};
use crate::config::Config;
use crate::error::ServerError;
use crate::procedures::ProcedureTable;
use crate::session::GameSession;
use crate::state_store::{StateStore, SyncContext};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{split_cell_address, ConnectionId, Request, ServerMessage};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};

/// How often running games are checked for an expired phase
const PHASE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from connection tasks to the event loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
        /// Receives the assigned ID, or None when the server is full
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    Message {
        client_id: ConnectionId,
        text: String,
    },
    Disconnected {
        client_id: ConnectionId,
    },
}

/// Owns all shared state and applies events one at a time
pub struct Dispatcher {
    clients: ClientManager,
    store: StateStore,
    procedures: ProcedureTable<GameSession>,
    session: GameSession,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Self {
        Self::with_session(config.max_connections, GameSession::new(config))
    }

    pub fn with_session(max_connections: usize, session: GameSession) -> Self {
        let procedures = GameSession::procedures();
        debug!("Serving procedures: {}", procedures.addresses().join(", "));

        Self {
            clients: ClientManager::new(max_connections),
            store: StateStore::new(),
            procedures,
            session,
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { addr, sender, reply } => {
                let client_id = self.clients.add_client(addr, sender);
                if let Some(id) = client_id {
                    self.session.on_join(id);
                }
                if reply.send(client_id).is_err() {
                    if let Some(id) = client_id {
                        debug!("Connection {} vanished before it opened", id);
                        self.disconnect(id);
                    }
                }
            }
            ServerEvent::Message { client_id, text } => self.handle_message(client_id, &text),
            ServerEvent::Disconnected { client_id } => self.disconnect(client_id),
        }
    }

    /// Processes one text frame from a connection
    pub fn handle_message(&mut self, client_id: ConnectionId, text: &str) {
        let request = match Request::decode(text) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping malformed frame from connection {}: {}", client_id, e);
                return;
            }
        };

        match request {
            Request::Subscribe { address } => {
                let (base, _) = split_cell_address(&address);
                if !self.procedures.is_cell(base) {
                    warn!("Connection {} subscribed to unknown cell {}", client_id, address);
                    return;
                }
                if !self.clients.subscribe(client_id, &address) {
                    return;
                }
                if let Some(value) = self.store.current(&address) {
                    self.clients
                        .send_to(client_id, ServerMessage::update(address, value.clone()));
                }
            }
            Request::Unsubscribe { address } => {
                self.clients.unsubscribe(client_id, &address);
            }
            Request::KeepaliveAck => {
                self.clients.mark_alive(client_id);
            }
            Request::Invoke {
                correlation_id,
                address,
                args,
            } => {
                let mut ctx = SyncContext::new(&mut self.store, &self.clients);
                let response =
                    match self
                        .procedures
                        .invoke(&mut self.session, &mut ctx, client_id, &address, args)
                    {
                        Ok(result) => ServerMessage::invoke_ok(correlation_id, result),
                        Err(e) => {
                            warn!("Call to {} from connection {} failed: {}", address, client_id, e);
                            ServerMessage::invoke_err(correlation_id, e.status(), e.to_string())
                        }
                    };
                self.clients.send_to(client_id, response);
            }
        }
    }

    /// Runs one liveness sweep and fires leave notifications for the dead
    pub fn sweep(&mut self) -> Vec<ConnectionId> {
        let dead = self.clients.sweep();
        for client_id in &dead {
            self.leave(*client_id);
        }
        dead
    }

    pub fn advance_phases(&mut self, now: Instant) {
        let mut ctx = SyncContext::new(&mut self.store, &self.clients);
        match self.session.advance_expired(&mut ctx, now) {
            Ok(0) => {}
            Ok(resolved) => debug!("Force-resolved {} phases", resolved),
            Err(e) => error!("Failed to advance expired phases: {}", e),
        }
    }

    fn disconnect(&mut self, client_id: ConnectionId) {
        // a swept connection has already been removed and notified
        if self.clients.remove_client(&client_id) {
            self.leave(client_id);
        }
    }

    fn leave(&mut self, client_id: ConnectionId) {
        let mut ctx = SyncContext::new(&mut self.store, &self.clients);
        if let Err(e) = self.session.on_leave(&mut ctx, client_id) {
            error!("Leave handling for connection {} failed: {}", client_id, e);
        }
    }
}

/// WebSocket sync server
pub struct SyncServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    keepalive_interval: Duration,
}

impl SyncServer {
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(config),
            keepalive_interval: config.keepalive_interval(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Main server loop coordinating all operations. Runs until the task is
    /// dropped or the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        let SyncServer {
            listener,
            mut dispatcher,
            keepalive_interval,
        } = self;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, event_tx));

        let start = tokio::time::Instant::now();
        let mut keepalive = interval_at(start + keepalive_interval, keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut phase_timer = interval_at(start + PHASE_CHECK_INTERVAL, PHASE_CHECK_INTERVAL);
        phase_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // the accept loop holds a sender for as long as it runs
                Some(event) = event_rx.recv() => dispatcher.handle_event(event),

                _ = keepalive.tick() => {
                    let dead = dispatcher.sweep();
                    if !dead.is_empty() {
                        info!("Closed {} unresponsive connections", dead.len());
                    }
                },

                _ = phase_timer.tick() => {
                    dispatcher.advance_phases(Instant::now());
                },
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<ServerEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, events).await {
                        debug!("Connection from {} ended with error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

fn transition(addr: SocketAddr, from: ConnectionState, to: ConnectionState) -> ConnectionState {
    debug!("{}: {:?} -> {:?}", addr, from, to);
    to
}

/// Drives one WebSocket: a writer task drains the outbound queue while this
/// task forwards inbound text frames to the event loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), tungstenite::Error> {
    let mut state = ConnectionState::Connecting;
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut inbound) = socket.split();

    let (sender, mut outbound) = mpsc::unbounded_channel::<ServerMessage>();
    let (reply, assigned) = oneshot::channel();
    if events.send(ServerEvent::Connected { addr, sender, reply }).is_err() {
        return Ok(());
    }

    let client_id = match assigned.await {
        Ok(Some(client_id)) => client_id,
        _ => {
            sink.send(Message::Close(None)).await?;
            transition(addr, state, ConnectionState::Closed);
            return Ok(());
        }
    };
    state = transition(addr, state, ConnectionState::Open);

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode frame for connection {}: {}", client_id, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // the registry dropped this connection, or the socket failed
        if let Err(e) = sink.close().await {
            debug!("Closing connection {} failed: {}", client_id, e);
        }
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = inbound.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(ServerEvent::Message { client_id, text }).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Read error on connection {}: {}", client_id, e);
                        break;
                    }
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            },
        }
    }

    state = transition(addr, state, ConnectionState::Closing);
    if events.send(ServerEvent::Disconnected { client_id }).is_err() {
        warn!("Event loop gone while closing connection {}", client_id);
    }
    if !writer_done {
        if let Err(e) = writer.await {
            error!("Writer task for connection {} panicked: {}", client_id, e);
        }
    }
    transition(addr, state, ConnectionState::Closed);

    Ok(())
}
