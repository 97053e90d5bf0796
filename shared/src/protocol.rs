//! Wire protocol spoken between `ClientSyncProxy` and the sync server.
//!
//! Every frame is a single JSON object. Client frames carry a `type` plus the
//! optional `address`, `correlationId` and `args` fields; which of them are
//! required depends on the type, so raw frames are decoded into
//! [`ClientMessage`] and then validated into a [`Request`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separates a cell's base address from its partition key (`room|g1`).
pub const PARTITION_SEPARATOR: char = '|';

/// Response status codes carried by `invoke-response` frames.
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const INTERNAL_ERROR: u16 = 500;
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("`{kind}` frame is missing required field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Builds the full address of a cell partition.
///
/// An absent or empty partition key addresses the default partition, which is
/// spelled as the bare base address.
pub fn cell_address(base: &str, partition: Option<&str>) -> String {
    match partition {
        Some(key) if !key.is_empty() => format!("{}{}{}", base, PARTITION_SEPARATOR, key),
        _ => base.to_string(),
    }
}

/// Splits `base|key` into its base address and partition key.
pub fn split_cell_address(address: &str) -> (&str, Option<&str>) {
    match address.split_once(PARTITION_SEPARATOR) {
        Some((base, key)) if !key.is_empty() => (base, Some(key)),
        Some((base, _)) => (base, None),
        None => (address, None),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClientMessageKind {
    Subscribe,
    Unsubscribe,
    KeepaliveAck,
    Invoke,
}

impl ClientMessageKind {
    fn as_str(self) -> &'static str {
        match self {
            ClientMessageKind::Subscribe => "subscribe",
            ClientMessageKind::Unsubscribe => "unsubscribe",
            ClientMessageKind::KeepaliveAck => "keepalive-ack",
            ClientMessageKind::Invoke => "invoke",
        }
    }
}

/// Raw client frame as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: ClientMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

/// A client frame whose required fields have been checked.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Subscribe {
        address: String,
    },
    Unsubscribe {
        address: String,
    },
    KeepaliveAck,
    Invoke {
        correlation_id: String,
        address: String,
        args: Vec<Value>,
    },
}

impl Request {
    /// Parses and validates a text frame received from a client.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage = serde_json::from_str(text)?;
        Request::try_from(message)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&ClientMessage::from(self.clone()))
    }
}

impl TryFrom<ClientMessage> for Request {
    type Error = ProtocolError;

    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        let kind = message.kind;
        let require = |field: Option<String>, name: &'static str| {
            field.ok_or(ProtocolError::MissingField {
                kind: kind.as_str(),
                field: name,
            })
        };

        match kind {
            ClientMessageKind::Subscribe => Ok(Request::Subscribe {
                address: require(message.address, "address")?,
            }),
            ClientMessageKind::Unsubscribe => Ok(Request::Unsubscribe {
                address: require(message.address, "address")?,
            }),
            ClientMessageKind::KeepaliveAck => Ok(Request::KeepaliveAck),
            ClientMessageKind::Invoke => Ok(Request::Invoke {
                correlation_id: require(message.correlation_id, "correlationId")?,
                address: require(message.address, "address")?,
                args: message.args.unwrap_or_default(),
            }),
        }
    }
}

impl From<Request> for ClientMessage {
    fn from(request: Request) -> Self {
        let empty = |kind| ClientMessage {
            kind,
            address: None,
            correlation_id: None,
            args: None,
        };

        match request {
            Request::Subscribe { address } => ClientMessage {
                address: Some(address),
                ..empty(ClientMessageKind::Subscribe)
            },
            Request::Unsubscribe { address } => ClientMessage {
                address: Some(address),
                ..empty(ClientMessageKind::Unsubscribe)
            },
            Request::KeepaliveAck => empty(ClientMessageKind::KeepaliveAck),
            Request::Invoke {
                correlation_id,
                address,
                args,
            } => ClientMessage {
                address: Some(address),
                correlation_id: Some(correlation_id),
                args: Some(args),
                ..empty(ClientMessageKind::Invoke)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMessageKind {
    KeepaliveProbe,
    Update,
    InvokeResponse,
}

/// Server frame as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerMessage {
    fn bare(kind: ServerMessageKind) -> Self {
        Self {
            kind,
            address: None,
            correlation_id: None,
            value: None,
            result: None,
            status: status::OK,
            error: None,
        }
    }

    pub fn keepalive_probe() -> Self {
        Self::bare(ServerMessageKind::KeepaliveProbe)
    }

    pub fn update(address: impl Into<String>, value: Value) -> Self {
        Self {
            address: Some(address.into()),
            value: Some(value),
            ..Self::bare(ServerMessageKind::Update)
        }
    }

    pub fn invoke_ok(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            result: Some(result),
            ..Self::bare(ServerMessageKind::InvokeResponse)
        }
    }

    pub fn invoke_err(correlation_id: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            status,
            error: Some(error.into()),
            ..Self::bare(ServerMessageKind::InvokeResponse)
        }
    }

    /// A response only counts as successful with status 200 and no error text.
    pub fn is_success(&self) -> bool {
        self.status == status::OK && self.error.is_none()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
