//! # Sync Server Library
//!
//! This library provides the authoritative server for the realtime state sync
//! protocol and the social-deduction game built on top of it. It owns every
//! state cell, dispatches procedure calls from clients, and pushes changed
//! cells to the connections subscribed to them.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Every piece of shared state lives in a server-side cell addressed by a
//! string path and optionally partitioned by a key (`room|group`). Clients
//! never write cells directly; they call procedures, and the procedures write.
//!
//! ### Connection Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and ID assignment
//! - Per-connection subscription sets
//! - Keepalive probing and forced close of silent connections
//! - Leave notifications on every kind of disconnect
//!
//! ### Procedure Dispatch
//! Calls arrive tagged with a correlation id and a dotted address. The address
//! is resolved in a statically built table, the arguments are decoded into the
//! handler's declared types, and the result or error goes back under the same
//! correlation id.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! The registry, the store, the procedure table and the game session are all
//! owned by one task that processes events sequentially. Handlers, broadcasts
//! and liveness sweeps therefore never interleave and need no locks.
//!
//! ### WebSocket Communication
//! Each connection gets a reader task that forwards text frames to the event
//! loop and a writer task that drains the connection's outbound queue. Frames
//! are JSON objects tagged by a `type` field.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Tracks open connections, their subscriptions and liveness flags, and fans
//! cell updates out to interested connections.
//!
//! ### State Store Module (`state_store`)
//! Holds the latest value of every cell and partition, and the typed
//! [`state_store::StateCell`] handle used by procedure handlers.
//!
//! ### Procedures Module (`procedures`)
//! The address-to-handler table with argument decoding and panic isolation.
//!
//! ### Game Module (`game`)
//! A pure rules engine: role assignment, day vote tally, priority-ordered
//! night resolution and win detection. Role catalogs live in `game::roles`.
//!
//! ### Session Module (`session`)
//! Glue between the procedure table and the engine. Manages group membership
//! and one running game per group, and republishes engine events into cells.
//!
//! ### Network Module (`network`)
//! The WebSocket listener, per-connection tasks and the event loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::Config;
//! use server::network::SyncServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         port: 9000,
//!         phase_duration_secs: Some(120),
//!         ..Config::default()
//!     };
//!
//!     // Binds the listener, then runs the event loop which:
//!     // - Accepts WebSocket connections up to the configured capacity
//!     // - Dispatches subscribe, unsubscribe, keepalive and invoke frames
//!     // - Sweeps connections that stopped answering keepalive probes
//!     // - Force-resolves game phases that ran past the phase duration
//!     let server = SyncServer::bind(&config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod procedures;
pub mod session;
pub mod state_store;
