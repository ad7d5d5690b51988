//! Glue between the platform events and the mirror components.
//!
//! ## Module Structure
//!
//! - `context`: Shared application context (`BridgeContext`)

pub mod context;

pub use context::BridgeContext;
