use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Latest known snapshot of one player, as sent by the upstream
/// `player_controller_entity_update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub steam_id: u64,
    #[serde(default)]
    pub entity_index: u64,
    #[serde(default)]
    pub steam_name: String,
    #[serde(default)]
    pub team: u64,
    #[serde(default)]
    pub hero_id: u64,
    #[serde(default)]
    pub player_slot: u64,
    #[serde(default)]
    pub rank: u64,
    #[serde(default)]
    pub assigned_lane: u64,
    #[serde(default)]
    pub original_assigned_lane: u64,
    #[serde(default)]
    pub upgrades: Vec<i64>,
}

impl PlayerState {
    pub fn new(steam_id: u64) -> Self {
        Self {
            steam_id,
            entity_index: 0,
            steam_name: String::new(),
            team: 0,
            hero_id: 0,
            player_slot: 0,
            rank: 0,
            assigned_lane: 0,
            original_assigned_lane: 0,
            upgrades: Vec::new(),
        }
    }
}

/// Per-match player states keyed by steam id.
///
/// Written only by the owning tracker's task, read by snapshot and query
/// callers from anywhere.
#[derive(Debug, Default)]
pub struct PlayerStore {
    players: DashMap<u64, PlayerState>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was stored for `steam_id`. No field-level merge.
    pub fn upsert(&self, steam_id: u64, state: PlayerState) {
        self.players.insert(steam_id, state);
    }

    pub fn get(&self, steam_id: u64) -> Option<PlayerState> {
        self.players.get(&steam_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<PlayerState> {
        self.players
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
