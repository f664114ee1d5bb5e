use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::Instrument;

use crate::config::TrackerConfig;
use crate::live::{EventSource, HttpEventSource, PlayerState};
use crate::tracker::{self, MatchTracker, TrackerMap};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("match {0} is already being tracked")]
    AlreadyTracked(String),
}

/// Point-in-time view of one tracked match.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSnapshot {
    pub match_id: String,
    pub connected: bool,
    pub players: Vec<PlayerState>,
}

/// Tracked matches, at most one tracker per match id.
///
/// Cloning gives another handle to the same registry. Tracker loops only hold
/// the map weakly, so once every handle is dropped they stop at their next
/// membership check.
pub struct MatchRegistry<S = HttpEventSource> {
    trackers: Arc<TrackerMap>,
    source: Arc<S>,
    config: TrackerConfig,
}

impl<S> Clone for MatchRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            trackers: self.trackers.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: EventSource> MatchRegistry<S> {
    pub fn new(source: S, config: TrackerConfig) -> Self {
        Self {
            trackers: Arc::new(DashMap::new()),
            source: Arc::new(source),
            config,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Start tracking `match_id`. Returns before any connection is attempted;
    /// the reconnection loop runs on a spawned task, so this must be called
    /// from within a tokio runtime.
    pub fn add_match(&self, match_id: &str) -> Result<(), RegistryError> {
        let tracker = match self.trackers.entry(match_id.to_string()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyTracked(match_id.to_string())),
            Entry::Vacant(slot) => {
                let tracker = Arc::new(MatchTracker::new(match_id));
                slot.insert(tracker.clone());
                tracker
            }
        };

        tracing::info!("Tracking match {}", match_id);
        let span = tracing::info_span!("match", match_id = %match_id);
        tokio::spawn(
            tracker::run(
                tracker,
                self.source.clone(),
                Arc::downgrade(&self.trackers),
                self.config.clone(),
            )
            .instrument(span),
        );
        Ok(())
    }

    /// Stop tracking `match_id`. A no-op for unknown ids. The loop is only
    /// asked to stop; it may still be winding down when this returns.
    pub fn remove_match(&self, match_id: &str) {
        if let Some((_, tracker)) = self.trackers.remove(match_id) {
            tracker.cancel();
            tracing::info!("Removed match {}", match_id);
        }
    }
}

impl<S> MatchRegistry<S> {
    pub fn contains(&self, match_id: &str) -> bool {
        self.trackers.contains_key(match_id)
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn tracker(&self, match_id: &str) -> Option<Arc<MatchTracker>> {
        self.trackers.get(match_id).map(|entry| entry.value().clone())
    }

    /// Latest state of one player in one match.
    pub fn query(&self, match_id: &str, steam_id: u64) -> Option<PlayerState> {
        self.tracker(match_id)?.players().get(steam_id)
    }

    /// Weakly consistent view of every match, sorted by match id with players
    /// sorted by steam id.
    pub fn snapshot(&self) -> Vec<MatchSnapshot> {
        let trackers: Vec<Arc<MatchTracker>> = self
            .trackers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut snapshots: Vec<MatchSnapshot> = trackers
            .iter()
            .map(|tracker| {
                let mut players = tracker.players().list();
                players.sort_by_key(|p| p.steam_id);
                MatchSnapshot {
                    match_id: tracker.match_id().to_string(),
                    connected: tracker.is_connected(),
                    players,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.match_id.cmp(&b.match_id));
        snapshots
    }
}
