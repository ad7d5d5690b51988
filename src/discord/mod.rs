//! Discord bot integration.
//!
//! This module provides the gateway connection, the admin commands and the
//! `GuildApi` seam the mirror components talk through.

pub mod api;
pub mod client;
pub mod commands;
#[cfg(test)]
pub mod fake;
pub mod handler;

// Re-export main types for external use
pub use client::DiscordBotBuilder;
