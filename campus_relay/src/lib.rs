// campus_relay: central coordinator for campus-to-campus messaging.
//
// Campuses open a TCP connection, authenticate with a campus name and
// pre-shared secret, and then exchange text messages through the relay,
// which forwards each one to the named target campus. Campuses also send
// periodic UDP heartbeats; the relay records where they came from and uses
// those endpoints for administrative broadcasts. The relay never stores
// messages: delivery is to whoever is connected right now.
//
// Module overview:
// - `server.rs`:    Listeners, shared `Relay` state, accept loop, shutdown.
// - `session.rs`:   Per-connection lifecycle: handshake, frame loop,
//                   teardown.
// - `registry.rs`:  Campus name -> session map shared by all threads.
// - `auth.rs`:      Validates the auth frame against the `IdentityStore`.
// - `router.rs`:    Delivers `FROM:` frames to a target campus.
// - `liveness.rs`:  Heartbeat intake on the UDP socket.
// - `broadcast.rs`: Administrative UDP broadcast.
// - `console.rs`:   Operator commands (`list`, `broadcast:`, `quit`).
// - `client.rs`:    `CampusClient`, the campus-side counterpart.
// - `config.rs`, `identity.rs`, `error.rs`, `stream.rs`: supporting types.
//
// Dependencies: `campus_protocol` (framing and message vocabulary).
//
// The relay runs as the `campus-relay` binary (`main.rs`) or embedded via
// `start_relay`. The `campus` binary is an interactive client.

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod identity;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod stream;

pub use client::{CampusClient, ClientOptions, Inbound};
pub use config::{RelayConfig, ServerArgs};
pub use error::{RelayError, Result};
pub use server::{Relay, RelayHandle, start_relay};
