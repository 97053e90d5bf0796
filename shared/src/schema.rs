//! Shared interface definition for every address the server exposes.
//!
//! Both sides are written against this table: the server registers one
//! handler per call address and one cell per subscription address, and the
//! client's typed stubs use the same constants.

use crate::protocol::cell_address;

/// Last path segment that turns a proxy path into a cell subscription.
pub const STATE_SUFFIX: &str = "sync";

pub mod procedures {
    pub const CONFIRM_JOIN: &str = "confirmJoin";
    pub const GAME_START: &str = "gameStart";
    pub const GAME_VOTE: &str = "gameVote";
    pub const GAME_ACTION: &str = "gameAction";
}

pub mod cells {
    pub const ROOM: &str = "room";
    pub const GAME_EVENTS: &str = "gameEvents";
    pub const PLAYER_INFO: &str = "playerInfo";
    pub const PLAYER_ROLE: &str = "playerRole";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Call,
    Subscription,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaEntry {
    pub address: &'static str,
    pub kind: AddressKind,
}

/// Every exposed address. Argument and value types are listed per entry;
/// `room` and `gameEvents` are partitioned by group id, `playerInfo` and
/// `playerRole` by user id.
pub const SCHEMA: &[SchemaEntry] = &[
    // (User, groupId: String) -> ()
    SchemaEntry {
        address: procedures::CONFIRM_JOIN,
        kind: AddressKind::Call,
    },
    // () -> ()
    SchemaEntry {
        address: procedures::GAME_START,
        kind: AddressKind::Call,
    },
    // (targetId: String) -> ()
    SchemaEntry {
        address: procedures::GAME_VOTE,
        kind: AddressKind::Call,
    },
    // (targetId: String, actionIndex: usize) -> ()
    SchemaEntry {
        address: procedures::GAME_ACTION,
        kind: AddressKind::Call,
    },
    // Room
    SchemaEntry {
        address: cells::ROOM,
        kind: AddressKind::Subscription,
    },
    // Vec<String>
    SchemaEntry {
        address: cells::GAME_EVENTS,
        kind: AddressKind::Subscription,
    },
    // Vec<String>
    SchemaEntry {
        address: cells::PLAYER_INFO,
        kind: AddressKind::Subscription,
    },
    // SerializedRole
    SchemaEntry {
        address: cells::PLAYER_ROLE,
        kind: AddressKind::Subscription,
    },
];

pub fn lookup(address: &str) -> Option<&'static SchemaEntry> {
    SCHEMA.iter().find(|entry| entry.address == address)
}

pub fn addresses(kind: AddressKind) -> impl Iterator<Item = &'static str> {
    SCHEMA
        .iter()
        .filter(move |entry| entry.kind == kind)
        .map(|entry| entry.address)
}

/// What a dotted proxy path resolves to on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRoute {
    /// Subscribe to the cell at this full address.
    Subscribe(String),
    /// Invoke the procedure at this address.
    Call(String),
}

/// Resolves a proxy path such as `room.sync` or `gameVote`.
///
/// Only a trailing `sync` segment selects a subscription; `partition` is
/// ignored for calls.
pub fn route(path: &str, partition: Option<&str>) -> ProxyRoute {
    match path.rsplit_once('.') {
        Some((base, STATE_SUFFIX)) => ProxyRoute::Subscribe(cell_address(base, partition)),
        _ => ProxyRoute::Call(path.to_string()),
    }
}
