#![deny(missing_docs)]

//! This crate tails serial ports on the host machine and shares them over the web.
//!
//! Every line a configured device prints is appended to the log file of that device,
//! then pushed to each connected websocket client.
//! Clients may send commands back to any device which is up, over the websocket or over HTTP.
//!
//! Devices which can't be opened, or which break while being read, are given up on.
//! Clients which can't keep up are disconnected, the logs are unaffected.

/// The messages exchanged with users,
/// as well as the responses.
pub mod actions;

/// Opens devices and runs their readers alongside the hub.
pub mod bridge;

/// The command line interface.
pub mod cli;

/// A websocket client of the server.
pub mod client;

/// Server configuration.
pub mod config;

/// Devices and their lifetimes.
pub mod device;

/// Possible errors in this library.
pub mod error;

/// Fan-out of lines to subscribers.
pub mod hub;

/// Per-device log files.
pub mod log_sink;

/// Tracing setup.
pub mod logging;

/// In-memory devices, for testing.
pub mod mock;

/// Who gets lines.
pub mod registry;

/// Routing commands to devices.
pub mod router;

/// Serial ports and reading lines from them.
pub mod serial;

/// Code relating to setting up a server.
pub mod server;

/// The websocket transport.
pub(crate) mod websocket;
