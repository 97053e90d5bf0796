//! Client-side proxy for the sync protocol
//!
//! [`ClientSyncProxy`] keeps a value cache and a callback registry per cell
//! address, and a table of calls waiting for their response. The proxy itself
//! does no I/O: it pushes [`Request`]s into an outbound channel and is fed
//! [`ServerMessage`]s through [`ClientSyncProxy::handle_message`].
//! [`ClientSyncProxy::connect`] wires both ends to a WebSocket.

use crate::error::{CallError, ClientError};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use shared::schema::{self, procedures, AddressKind, ProxyRoute};
use shared::{split_cell_address, Request, ServerMessage, ServerMessageKind, User};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

/// Receives the new value and the full address it was written to.
pub type Callback = Arc<dyn Fn(&Value, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Resolver = oneshot::Sender<Result<Value, CallError>>;

#[derive(Default)]
struct ProxyState {
    cache: HashMap<String, Value>,
    callbacks: HashMap<String, Vec<(SubscriptionId, Callback)>>,
    pending: HashMap<String, Resolver>,
    next_subscription: u64,
    next_call: u64,
    closed: bool,
}

#[derive(Clone)]
pub struct ClientSyncProxy {
    state: Arc<Mutex<ProxyState>>,
    outbound: mpsc::UnboundedSender<Request>,
}

impl ClientSyncProxy {
    pub fn new(outbound: mpsc::UnboundedSender<Request>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProxyState::default())),
            outbound,
        }
    }

    /// Opens a WebSocket to `url` and spawns the tasks that pump frames in
    /// both directions.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        info!("Connected to {}", url);
        let (mut sink, mut inbound) = socket.split();

        let (outbound, mut requests) = mpsc::unbounded_channel::<Request>();
        let proxy = Self::new(outbound);

        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let text = match request.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode request: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("Error closing socket: {}", e);
            }
        });

        let reader = proxy.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::decode(&text) {
                        Ok(message) => reader.handle_message(message),
                        Err(e) => warn!("Ignoring malformed server frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Connection error: {}", e);
                        break;
                    }
                }
            }
            info!("Disconnected from server");
            reader.close();
        });

        Ok(proxy)
    }

    fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, request: Request) -> bool {
        self.outbound.send(request).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Last value seen for `address`.
    pub fn cached(&self, address: &str) -> Option<Value> {
        self.lock().cache.get(address).cloned()
    }

    /// Registers `callback` for a cell address.
    ///
    /// Only the first callback for an address sends `subscribe`; later ones
    /// are handed the cached value immediately, before this returns.
    pub fn subscribe_to_cell<F>(&self, address: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);

        let (id, first, cached) = {
            let mut state = self.lock();
            let id = SubscriptionId(state.next_subscription);
            state.next_subscription += 1;

            let registered = state.callbacks.entry(address.to_string()).or_default();
            let first = registered.is_empty();
            registered.push((id, Arc::clone(&callback)));

            let cached = if first { None } else { state.cache.get(address).cloned() };
            (id, first, cached)
        };

        if first {
            debug!("Subscribing to {}", address);
            self.send(Request::Subscribe {
                address: address.to_string(),
            });
        } else if let Some(value) = cached {
            callback(&value, address);
        }

        id
    }

    /// Removes one callback. Returns false if it was not registered.
    pub fn unsubscribe_from_cell(&self, address: &str, id: SubscriptionId) -> bool {
        let last = {
            let mut state = self.lock();
            let Some(registered) = state.callbacks.get_mut(address) else {
                return false;
            };
            let before = registered.len();
            registered.retain(|(existing, _)| *existing != id);
            if registered.len() == before {
                return false;
            }

            let last = registered.is_empty();
            if last {
                state.callbacks.remove(address);
                state.cache.remove(address);
            }
            last
        };

        if last {
            debug!("Unsubscribing from {}", address);
            self.send(Request::Unsubscribe {
                address: address.to_string(),
            });
        }
        true
    }

    /// Subscribes through a proxy path such as `room.sync`.
    pub fn subscribe_path<F>(
        &self,
        path: &str,
        partition: Option<&str>,
        callback: F,
    ) -> Result<SubscriptionId, ClientError>
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        match schema::route(path, partition) {
            ProxyRoute::Subscribe(address) => {
                let (base, _) = split_cell_address(&address);
                match schema::lookup(base) {
                    Some(entry) if entry.kind == AddressKind::Call => Err(ClientError::NotSubscribable(address)),
                    _ => Ok(self.subscribe_to_cell(&address, callback)),
                }
            }
            ProxyRoute::Call(address) => Err(ClientError::NotSubscribable(address)),
        }
    }

    /// Invokes a server procedure and waits for its response.
    pub async fn call(&self, address: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let (resolver, response) = oneshot::channel();

        let correlation_id = {
            let mut state = self.lock();
            if state.closed {
                return Err(CallError::Disconnected);
            }
            state.next_call += 1;
            let correlation_id = format!("{}-{}", state.next_call, address);
            state.pending.insert(correlation_id.clone(), resolver);
            correlation_id
        };

        let sent = self.send(Request::Invoke {
            correlation_id: correlation_id.clone(),
            address: address.to_string(),
            args,
        });
        if !sent {
            self.lock().pending.remove(&correlation_id);
            return Err(CallError::Disconnected);
        }

        response.await.unwrap_or(Err(CallError::Disconnected))
    }

    /// Applies one frame received from the server.
    pub fn handle_message(&self, message: ServerMessage) {
        match message.kind {
            ServerMessageKind::KeepaliveProbe => {
                self.send(Request::KeepaliveAck);
            }
            ServerMessageKind::Update => {
                let (Some(address), Some(value)) = (message.address, message.value) else {
                    debug!("Ignoring update without address or value");
                    return;
                };

                let targets: Vec<Callback> = {
                    let mut state = self.lock();
                    let (base, partition) = split_cell_address(&address);
                    let mut targets: Vec<Callback> = state
                        .callbacks
                        .get(address.as_str())
                        .into_iter()
                        .flatten()
                        .map(|(_, callback)| Arc::clone(callback))
                        .collect();
                    if partition.is_some() {
                        targets.extend(
                            state
                                .callbacks
                                .get(base)
                                .into_iter()
                                .flatten()
                                .map(|(_, callback)| Arc::clone(callback)),
                        );
                    }
                    state.cache.insert(address.clone(), value.clone());
                    targets
                };

                for callback in targets {
                    callback(&value, &address);
                }
            }
            ServerMessageKind::InvokeResponse => {
                let success = message.is_success();
                let Some(correlation_id) = message.correlation_id else {
                    warn!("Ignoring response without correlation id");
                    return;
                };
                let Some(resolver) = self.lock().pending.remove(&correlation_id) else {
                    warn!("Response for unknown call {}", correlation_id);
                    return;
                };

                let outcome = if success {
                    Ok(message.result.unwrap_or(Value::Null))
                } else {
                    Err(CallError::Server {
                        status: message.status,
                        message: message.error.unwrap_or_default(),
                    })
                };
                if resolver.send(outcome).is_err() {
                    debug!("Caller of {} stopped waiting", correlation_id);
                }
            }
        }
    }

    /// Marks the connection closed and fails every outstanding call.
    pub fn close(&self) {
        let pending: Vec<Resolver> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().map(|(_, resolver)| resolver).collect()
        };
        for resolver in pending {
            // the caller may already be gone
            let _ = resolver.send(Err(CallError::Disconnected));
        }
    }

    pub async fn confirm_join(&self, user: &User, group_id: &str) -> Result<(), CallError> {
        self.call_unit(procedures::CONFIRM_JOIN, (user, group_id)).await
    }

    pub async fn game_start(&self) -> Result<(), CallError> {
        self.call(procedures::GAME_START, Vec::new()).await.map(drop)
    }

    pub async fn game_vote(&self, target_id: &str) -> Result<(), CallError> {
        self.call_unit(procedures::GAME_VOTE, (target_id,)).await
    }

    pub async fn game_action(&self, target_id: &str, action_index: usize) -> Result<(), CallError> {
        self.call_unit(procedures::GAME_ACTION, (target_id, action_index)).await
    }

    async fn call_unit<A: Serialize>(&self, address: &str, args: A) -> Result<(), CallError> {
        let args = match serde_json::to_value(args) {
            Ok(Value::Array(args)) => args,
            Ok(other) => vec![other],
            Err(e) => return Err(CallError::Encode(e.to_string())),
        };
        self.call(address, args).await.map(drop)
    }
}
