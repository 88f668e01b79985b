//! In-memory broadcast hub: a directory of connected peers plus fan-out.
//!
//! A peer registers under a display name; anything it broadcasts is
//! delivered to every other registered peer. Nothing is persisted.
//!
//! The core knows nothing about sockets:
//!
//! - [`recipient`] defines the [`Recipient`](recipient::Recipient)
//!   capability a transport implements for each peer, plus an in-process
//!   channel-backed implementation.
//! - [`registry`] is the lock-guarded directory with point-in-time snapshots.
//! - [`hub`] registers and unregisters peers and runs the broadcast: deliveries
//!   happen against a snapshot, outside the lock, each bounded by a timeout,
//!   and failing recipients are evicted afterwards.
//! - [`config`] and [`error`] hold the tunables and error types.
//!
//! The rest is one concrete transport:
//!
//! - [`protocol`] is the JSON line protocol with async read/write helpers.
//! - [`server`] accepts TCP connections and maps each one onto hub calls.
//! - [`client`] connects to a server and multiplexes stdin with incoming chat.
//! - [`cli`] parses the command line for server and client modes.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod recipient;
pub mod registry;
pub mod server;
