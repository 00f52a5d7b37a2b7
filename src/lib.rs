//! Library entrypoint for matchday-chat.
//!
//! Exposes all modules so integration tests can import them.

pub mod api;
pub mod config;
pub mod connection;
pub mod data;
pub mod protocol;
pub mod room;
pub mod transport;
