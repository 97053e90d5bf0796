use serde::{Deserialize, Serialize};

pub mod protocol;
pub mod schema;

pub use protocol::{
    cell_address, split_cell_address, status, ProtocolError, Request, ServerMessage,
    ServerMessageKind,
};

/// Opaque per-connection identity assigned by the server.
pub type ConnectionId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub left: bool,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar: None,
            left: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GameStatus {
    Pending,
    InProgressDay,
    InProgressNight,
    Ended,
}

/// Roster and status of one participant group.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub users: Vec<User>,
    pub game_status: GameStatus,
}

impl Room {
    pub fn pending(users: Vec<User>) -> Self {
        Self {
            users,
            game_status: GameStatus::Pending,
        }
    }

    pub fn active_users(&self) -> impl Iterator<Item = &User> {
        self.users.iter().filter(|u| !u.left)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SerializedAlignment {
    pub name: String,
    pub members: Vec<String>,
}

/// A role as revealed to the player holding it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SerializedRole {
    pub name: String,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<SerializedAlignment>,
}
