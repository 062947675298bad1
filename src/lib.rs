//! Discord music bot built around a per-guild frame-streaming player.
//!
//! [`audio`] holds the playback core and has no Discord dependency beyond ids;
//! [`bot`] adapts it to slash commands and songbird voice connections.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
