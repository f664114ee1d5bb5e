//! Live match state tracking.
//!
//! A [`MatchRegistry`] owns one [`MatchTracker`] per tracked match. Each
//! tracker keeps a long-lived SSE connection to the live events service open,
//! reconnecting with capped exponential backoff, and folds
//! `player_controller_entity_update` events into a per-match [`PlayerStore`].

pub mod config;
pub mod http;
pub mod live;
pub mod printer;
pub mod registry;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use config::{ServerConfig, TrackerConfig};
pub use live::{EventSource, HttpEventSource, PlayerState, PlayerStore, StreamEvent, TrackerError};
pub use registry::{MatchRegistry, MatchSnapshot, RegistryError};
pub use tracker::{Backoff, MatchTracker, TrackerPhase};
