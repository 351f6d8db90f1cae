//! tbtrack application library
//!
//! Configuration, SQLite persistence, the host HTTP server and the client
//! used to reach it. Shared by the `tbtrack` CLI and `tbtrack-server`.

pub mod client;
pub mod config;
pub mod db;
pub mod discovery;
pub mod server;
