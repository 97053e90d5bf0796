//! # Sync Client Library
//!
//! This library provides the client side of the realtime state sync protocol.
//! It mirrors the server's cells into a local cache, notifies registered
//! callbacks when cells change, and turns procedure calls into futures that
//! resolve when the matching response arrives.
//!
//! ## Architecture Overview
//!
//! ### Subscriptions
//! Any number of callbacks may watch one cell address, but the server only
//! hears about the first. Callbacks registered later are served from the cache
//! straight away, so every watcher sees the current value without another
//! round trip. A callback on a base address such as `room` also sees updates
//! to every partition of it (`room|group-1`, `room|group-2`).
//!
//! ### Remote Calls
//! Each call gets a fresh correlation id and a slot in the pending table.
//! Responses are matched back by that id, so calls may be in flight
//! concurrently and may complete in any order. When the connection drops,
//! every pending call fails with [`error::CallError::Disconnected`].
//!
//! ### Keepalive
//! Probes from the server are acknowledged as soon as they are read. A client
//! that stops reading is closed by the server after one missed interval.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`network::ClientSyncProxy`], its WebSocket transport, and typed stubs for
//! the game procedures (`confirm_join`, `game_start`, `game_vote`,
//! `game_action`).
//!
//! ### Error Module (`error`)
//! Call failures and transport errors.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ClientSyncProxy;
//! use shared::User;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = ClientSyncProxy::connect("ws://127.0.0.1:8080").await?;
//!
//!     proxy.subscribe_path("room.sync", Some("group-1"), |room, _| {
//!         println!("room is now {}", room);
//!     })?;
//!
//!     proxy.confirm_join(&User::new("u1", "ann"), "group-1").await?;
//!     proxy.game_start().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;
