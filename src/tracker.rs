//! Per-match reconnection loop.
//!
//! A tracker moves `Disconnected -> Connecting -> Streaming` and falls back to
//! `Disconnected` on any failure, sleeping with capped exponential backoff
//! before the next attempt. It reaches `Terminated` when its match leaves the
//! registry or the upstream sends `end`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::config::TrackerConfig;
use crate::live::{EventSource, EventStream, PlayerStore, StreamEvent, TrackerError, STATUS_OK};

/// Registry storage shared with tracker loops (loops only hold it weakly).
pub(crate) type TrackerMap = DashMap<String, Arc<MatchTracker>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackerPhase {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    Terminated = 3,
}

impl TrackerPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Streaming,
            3 => Self::Terminated,
            _ => Self::Disconnected,
        }
    }
}

/// Shortest delay a [`Backoff`] will hand out.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff between reconnection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(MIN_RETRY_DELAY);
        let initial = initial.clamp(MIN_RETRY_DELAY, max);
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            current: initial,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            config.initial_retry_delay,
            config.max_retry_delay,
            config.retry_multiplier,
        )
    }

    /// Delay to wait now; grows the delay for the following failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Cancellation state for the in-flight attempt. `closed` is sticky: once set,
/// no new attempt may start.
#[derive(Debug, Default)]
struct CancelSlot {
    closed: bool,
    current: Option<watch::Sender<bool>>,
}

/// One tracked match: its player store, phase, and cancellation handle.
#[derive(Debug)]
pub struct MatchTracker {
    match_id: String,
    players: PlayerStore,
    phase: AtomicU8,
    cancel: Mutex<CancelSlot>,
}

enum Outcome {
    Ended,
    Cancelled,
    Failed(TrackerError),
}

impl MatchTracker {
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            players: PlayerStore::new(),
            phase: AtomicU8::new(TrackerPhase::Disconnected as u8),
            cancel: Mutex::new(CancelSlot::default()),
        }
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn players(&self) -> &PlayerStore {
        &self.players
    }

    pub fn phase(&self) -> TrackerPhase {
        TrackerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == TrackerPhase::Streaming
    }

    /// Abort the current attempt (or backoff sleep) and refuse any further
    /// ones. Idempotent.
    pub fn cancel(&self) {
        let mut slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        slot.closed = true;
        if let Some(tx) = &slot.current {
            tx.send_replace(true);
        }
    }

    fn set_phase(&self, phase: TrackerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Install a fresh cancellation handle for the next attempt, replacing the
    /// previous one. `None` once the tracker has been cancelled.
    fn begin_attempt(&self) -> Option<watch::Receiver<bool>> {
        let mut slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            return None;
        }
        let (tx, rx) = watch::channel(false);
        slot.current = Some(tx);
        Some(rx)
    }

    /// One connection: open, check status, then apply events until the stream
    /// ends. `Ok(())` only when the match ended.
    async fn stream_events<S: EventSource>(
        &self,
        source: &S,
        config: &TrackerConfig,
        backoff: &mut Backoff,
    ) -> Result<(), TrackerError> {
        self.set_phase(TrackerPhase::Connecting);
        let response = tokio::time::timeout(config.connect_timeout, source.open(&self.match_id))
            .await
            .map_err(|_| TrackerError::ConnectTimeout(config.connect_timeout))??;

        if response.status != STATUS_OK {
            return Err(TrackerError::Status(response.status));
        }

        self.set_phase(TrackerPhase::Streaming);
        backoff.reset();
        tracing::info!("Connected to events for match {}", self.match_id);

        let mut events = EventStream::new(response.body);
        while let Some(event) = events.next_event().await? {
            match event {
                StreamEvent::PlayerUpdate(state) => {
                    self.players.upsert(state.steam_id, state);
                }
                StreamEvent::End => return Ok(()),
                StreamEvent::Unknown { event_type } => {
                    tracing::debug!("Ignoring event type {}", event_type);
                }
            }
        }
        Err(TrackerError::Closed)
    }
}

/// Resolves once the attempt behind `rx` is cancelled.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the wait; only a superseded attempt drops one.
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

fn still_tracked(trackers: &Weak<TrackerMap>, tracker: &Arc<MatchTracker>) -> bool {
    trackers.upgrade().is_some_and(|map| {
        map.get(tracker.match_id())
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), tracker))
    })
}

fn remove_if_current(trackers: &Weak<TrackerMap>, tracker: &Arc<MatchTracker>) {
    if let Some(map) = trackers.upgrade() {
        map.remove_if(tracker.match_id(), |_, current| Arc::ptr_eq(current, tracker));
    }
}

/// Background loop for one tracker. Exits when the tracker is no longer the
/// registry's entry for its match, or after an `end` event.
pub(crate) async fn run<S: EventSource>(
    tracker: Arc<MatchTracker>,
    source: Arc<S>,
    trackers: Weak<TrackerMap>,
    config: TrackerConfig,
) {
    let mut backoff = Backoff::from_config(&config);

    loop {
        if !still_tracked(&trackers, &tracker) {
            break;
        }
        let Some(mut cancel) = tracker.begin_attempt() else {
            break;
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Outcome::Cancelled,
            result = tracker.stream_events(source.as_ref(), &config, &mut backoff) => match result {
                Ok(()) => Outcome::Ended,
                Err(e) => Outcome::Failed(e),
            },
        };

        match outcome {
            Outcome::Ended => {
                tracing::info!("Match {} has ended, removing from tracking", tracker.match_id());
                remove_if_current(&trackers, &tracker);
                tracker.cancel();
                break;
            }
            Outcome::Cancelled => {
                tracing::debug!("Connection for match {} cancelled", tracker.match_id());
                tracker.set_phase(TrackerPhase::Disconnected);
            }
            Outcome::Failed(e) => {
                tracker.set_phase(TrackerPhase::Disconnected);
                if !still_tracked(&trackers, &tracker) {
                    break;
                }
                let delay = backoff.next_delay();
                tracing::warn!(
                    "Connection error for match {}: {}. Retrying in {:?}",
                    tracker.match_id(),
                    e,
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled(&mut cancel) => {
                        tracing::debug!("Retry for match {} cancelled", tracker.match_id());
                    }
                }
            }
        }
    }

    tracker.set_phase(TrackerPhase::Terminated);
    tracing::info!("Stopped tracking match {}", tracker.match_id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, Script, ScriptedSource};

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(secs(1.0), secs(30.0), 1.5);
        let delays: Vec<Duration> = (0..10).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], secs(1.0));
        assert_eq!(delays[1], secs(1.5));
        assert_eq!(delays[2], secs(2.25));
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(delays.iter().all(|d| *d <= secs(30.0)));
        assert_eq!(delays[9], secs(30.0));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(secs(1.0), secs(30.0), 1.5);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), secs(1.0));
    }

    #[test]
    fn test_backoff_initial_above_cap() {
        let mut backoff = Backoff::new(secs(60.0), secs(30.0), 1.5);
        assert_eq!(backoff.next_delay(), secs(30.0));
        assert_eq!(backoff.next_delay(), secs(30.0));
    }

    #[test]
    fn test_backoff_zero_config_still_waits() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO, 0.0);
        let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();
        assert!(delays.iter().all(|d| *d >= MIN_RETRY_DELAY));

        let mut backoff = Backoff::new(Duration::ZERO, secs(30.0), 1.5);
        let delays: Vec<Duration> = (0..40).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], MIN_RETRY_DELAY);
        assert!(delays[1] > delays[0]);
        assert_eq!(*delays.last().unwrap(), secs(30.0));
    }

    #[test]
    fn test_cancel_is_sticky() {
        let tracker = MatchTracker::new("m1");
        let mut rx = tracker.begin_attempt().unwrap();
        assert!(!*rx.borrow_and_update());
        tracker.cancel();
        tracker.cancel();
        assert!(*rx.borrow());
        assert!(tracker.begin_attempt().is_none());
    }

    #[test]
    fn test_new_attempt_replaces_handle() {
        let tracker = MatchTracker::new("m1");
        let first = tracker.begin_attempt().unwrap();
        let second = tracker.begin_attempt().unwrap();
        tracker.cancel();
        // The superseded handle's sender is gone; the live one sees the signal.
        assert!(first.has_changed().is_err());
        assert!(*second.borrow());
    }

    fn spawn_loop(
        match_id: &str,
        source: Arc<ScriptedSource>,
        config: TrackerConfig,
    ) -> (Arc<TrackerMap>, Arc<MatchTracker>, tokio::task::JoinHandle<()>) {
        let map: Arc<TrackerMap> = Arc::new(DashMap::new());
        let tracker = Arc::new(MatchTracker::new(match_id));
        map.insert(match_id.to_string(), tracker.clone());
        let handle = tokio::spawn(run(tracker.clone(), source, Arc::downgrade(&map), config));
        (map, tracker, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_map_dropped() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let (map, tracker, handle) = spawn_loop("m1", source.clone(), TrackerConfig::default());
        tokio::time::sleep(secs(0.5)).await;
        drop(map);
        handle.await.unwrap();
        assert_eq!(tracker.phase(), TrackerPhase::Terminated);
        assert_eq!(source.opens().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_bounds_open() {
        let config = TrackerConfig {
            connect_timeout: secs(10.0),
            ..TrackerConfig::default()
        };
        let source = Arc::new(ScriptedSource::new(vec![Script::Pending, Script::Hang(vec![])]));
        let (_map, tracker, _handle) = spawn_loop("m1", source.clone(), config);

        tokio::time::sleep(secs(12.0)).await;
        let opens = source.opens();
        assert_eq!(opens.len(), 2);
        assert_close(opens[1] - opens[0], secs(11.0));
        assert!(tracker.is_connected());
        tracker.cancel();
    }
}
