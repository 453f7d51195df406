//! Relay daemon - name registry, readiness multiplexer and message router
//!
//! This crate provides the server side of the relay:
//! - `config` - layered, validated startup configuration
//! - `registry` - account name to connection map
//! - `router` - per-iteration pending message set
//! - `dispatch` - turns client requests into connection actions
//! - `server` - the single-threaded dispatch loop over TCP
//! - `console` - administrative commands over storage
//! - `cli` - the `relayd` binary entry point
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       relayd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   RelayServer   │────▶│        Dispatcher           │    │
//! │  │  (Multiplexer)  │◀────│  Registry + MessageRouter   │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │ TCP                         │ login/logout      │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │     clients     │     │     Arc<dyn Storage>        │    │
//! │  └─────────────────┘     └──────────────┬──────────────┘    │
//! │                                         │ queries           │
//! │                          ┌──────────────┴──────────────┐    │
//! │                          │  Console (own thread)       │    │
//! │                          └─────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - One misbehaving client never stops the loop

pub mod cli;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod registry;
pub mod router;
pub mod server;
