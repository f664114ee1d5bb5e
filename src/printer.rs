//! Periodic dump of every tracked match to stdout.

use std::fmt::Write;
use std::time::Duration;

use crate::registry::{MatchRegistry, MatchSnapshot};

/// Render a snapshot as the human-readable state report.
pub fn render_report(snapshots: &[MatchSnapshot], timestamp: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Match States at {} ===", timestamp);

    if snapshots.is_empty() {
        let _ = writeln!(out, "No matches currently being tracked");
    }
    for snapshot in snapshots {
        let status = if snapshot.connected { "connected" } else { "disconnected" };
        let _ = writeln!(out, "Match ID: {} ({})", snapshot.match_id, status);
        for ps in &snapshot.players {
            let _ = writeln!(
                out,
                "  Steam ID: {}, Name: {}, Team: {}, Hero ID: {}, Player Slot: {}",
                ps.steam_id, ps.steam_name, ps.team, ps.hero_id, ps.player_slot
            );
            let _ = writeln!(
                out,
                "    Entity Index: {}, Original Assigned Lane: {}",
                ps.entity_index, ps.original_assigned_lane
            );
            let _ = writeln!(out, "    Upgrades: {:?}", ps.upgrades);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "=== End of Match States ===");
    out
}

/// Print the registry every `period` until the task is dropped.
pub async fn run_state_printer<S>(registry: MatchRegistry<S>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick fires immediately; skip it so the first report comes after one period.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        println!("{}", render_report(&registry.snapshot(), &timestamp));
    }
}
