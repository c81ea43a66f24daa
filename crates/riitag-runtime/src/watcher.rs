//! Background polling of the remote RiiTag.
//!
//! The watcher ticks once a second. A tick polls only when `check_interval`
//! has passed since the last successful poll; otherwise it re-evaluates the
//! previous state's staleness so presence is cleared on time even between
//! polls. Every tick that produces a state different from the previous one
//! emits exactly one `StateChanged`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use riitag_api::{ApiError, StateSource};
use riitag_core::{Preferences, RemoteState};

pub const TICK: Duration = Duration::from_secs(1);
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    StateChanged(RemoteState),
    NotFound(String),
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    Unchanged,
    NotFound,
    Errored,
}

pub struct Watcher<S> {
    source: S,
    user_id: String,
    prefs: watch::Receiver<Preferences>,
    events: mpsc::UnboundedSender<WatcherEvent>,
    previous: Option<RemoteState>,
    last_poll: Option<Instant>,
    not_found_reported: bool,
}

impl<S: StateSource + 'static> Watcher<S> {
    pub fn new(
        source: S,
        user_id: impl Into<String>,
        prefs: watch::Receiver<Preferences>,
        events: mpsc::UnboundedSender<WatcherEvent>,
    ) -> Self {
        Self {
            source,
            user_id: user_id.into(),
            prefs,
            events,
            previous: None,
            last_poll: None,
            not_found_reported: false,
        }
    }

    /// The state most recently published.
    pub fn previous(&self) -> Option<&RemoteState> {
        self.previous.as_ref()
    }

    pub async fn tick(&mut self) -> PollOutcome {
        self.tick_at(Instant::now(), Utc::now()).await
    }

    /// One iteration. `now` drives the poll schedule, `wall` the staleness
    /// check against last-played timestamps.
    pub async fn tick_at(&mut self, now: Instant, wall: DateTime<Utc>) -> PollOutcome {
        // Copied out so the borrow is not held across the fetch.
        let prefs = *self.prefs.borrow();

        let due = self
            .last_poll
            .map_or(true, |last| now.duration_since(last) >= prefs.check_interval());

        let base = if due {
            match self.source.fetch_state(&self.user_id).await {
                Ok(state) => {
                    self.last_poll = Some(now);
                    state
                }
                Err(ApiError::NotFound(message)) => {
                    self.last_poll = Some(now);
                    if !self.not_found_reported {
                        self.not_found_reported = true;
                        tracing::warn!(user_id = %self.user_id, "RiiTag not found");
                        self.previous = Some(
                            RemoteState::default().with_staleness(wall, prefs.presence_timeout()),
                        );
                        self.emit(WatcherEvent::NotFound(message));
                        return PollOutcome::NotFound;
                    }
                    RemoteState::default()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch RiiTag");
                    return PollOutcome::Errored;
                }
            }
        } else {
            match &self.previous {
                Some(previous) => previous.clone(),
                None => return PollOutcome::Unchanged,
            }
        };

        let candidate = base.with_staleness(wall, prefs.presence_timeout());
        if self.previous.as_ref() == Some(&candidate) {
            return PollOutcome::Unchanged;
        }

        tracing::debug!(
            outdated = candidate.outdated,
            game_id = candidate.last_played.as_ref().map(|lp| lp.game_id.as_str()),
            "RiiTag state changed"
        );
        self.emit(WatcherEvent::StateChanged(candidate.clone()));
        self.previous = Some(candidate);
        PollOutcome::Updated
    }

    /// Tick until `stop` is set or nobody is listening any more.
    pub async fn run(mut self, stop: Arc<AtomicBool>) {
        tracing::info!(user_id = %self.user_id, "Watching RiiTag");
        while !stop.load(Ordering::SeqCst) && !self.events.is_closed() {
            let delay = match self.tick().await {
                PollOutcome::Errored => ERROR_BACKOFF,
                _ => TICK,
            };
            tokio::time::sleep(delay).await;
        }
        tracing::debug!("Watcher stopped");
    }

    pub fn spawn(self) -> WatcherHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(self.run(stop.clone()));
        WatcherHandle { stop, task }
    }

    fn emit(&self, event: WatcherEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Watcher event dropped, receiver gone");
        }
    }
}

pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Ask the loop to stop and wait for it to finish its current iteration.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Watcher task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Scripted, ScriptedSource};
    use chrono::Duration as ChronoDuration;
    use riitag_core::{LastPlayed, RiitagUser};

    fn playing(game_id: &str, played_at: DateTime<Utc>) -> RemoteState {
        RemoteState {
            user: RiitagUser {
                name: Some("Larsen".into()),
                id: Some("123".into()),
            },
            games: vec![game_id.into()],
            last_played: Some(LastPlayed {
                console: "wii".into(),
                game_id: game_id.into(),
                region: None,
                played_at: Some(played_at),
            }),
            outdated: false,
        }
    }

    fn watcher(
        source: ScriptedSource,
    ) -> (
        Watcher<ScriptedSource>,
        mpsc::UnboundedReceiver<WatcherEvent>,
        watch::Sender<Preferences>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (prefs_tx, prefs_rx) = watch::channel(Preferences::default());
        (
            Watcher::new(source, "123", prefs_rx, events_tx),
            events_rx,
            prefs_tx,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WatcherEvent>) -> Vec<WatcherEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_change_fires_once_per_transition() {
        let wall = Utc::now();
        let mario = playing("RMCE01", wall);
        let mut mario_more_games = mario.clone();
        mario_more_games.games.push("SMNE01".into());
        let smash = playing("RSBE01", wall);

        let source = ScriptedSource::new([
            Scripted::State(mario.clone()),
            Scripted::State(mario_more_games),
            Scripted::State(smash.clone()),
            Scripted::State(smash.clone()),
            Scripted::State(mario.clone()),
        ]);
        let (mut watcher, mut rx, _prefs) = watcher(source.clone());
        let start = Instant::now();
        let interval = Preferences::default().check_interval();

        let outcomes = [
            watcher.tick_at(start, wall).await,
            watcher.tick_at(start + interval, wall).await,
            watcher.tick_at(start + interval * 2, wall).await,
            watcher.tick_at(start + interval * 3, wall).await,
            watcher.tick_at(start + interval * 4, wall).await,
        ];
        assert_eq!(
            outcomes,
            [
                PollOutcome::Updated,
                PollOutcome::Unchanged,
                PollOutcome::Updated,
                PollOutcome::Unchanged,
                PollOutcome::Updated,
            ]
        );
        assert_eq!(source.calls(), 5);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                WatcherEvent::StateChanged(mario.clone()),
                WatcherEvent::StateChanged(smash),
                WatcherEvent::StateChanged(mario),
            ]
        );
    }

    #[tokio::test]
    async fn test_polls_only_after_check_interval() {
        let wall = Utc::now();
        let source = ScriptedSource::new([Scripted::State(playing("RMCE01", wall))]);
        let (mut watcher, _rx, _prefs) = watcher(source.clone());
        let start = Instant::now();

        watcher.tick_at(start, wall).await;
        watcher.tick_at(start + Duration::from_secs(1), wall).await;
        watcher.tick_at(start + Duration::from_secs(9), wall).await;
        assert_eq!(source.calls(), 1);

        watcher.tick_at(start + Duration::from_secs(10), wall).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_check_interval_change_applies_live() {
        let wall = Utc::now();
        let source = ScriptedSource::new([Scripted::State(playing("RMCE01", wall))]);
        let (mut watcher, _rx, prefs) = watcher(source.clone());
        let start = Instant::now();

        watcher.tick_at(start, wall).await;
        prefs.send_modify(|p| p.check_interval = 2);
        watcher.tick_at(start + Duration::from_secs(1), wall).await;
        assert_eq!(source.calls(), 1);
        watcher.tick_at(start + Duration::from_secs(2), wall).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_last_poll() {
        let wall = Utc::now();
        let source = ScriptedSource::new([
            Scripted::State(playing("RMCE01", wall)),
            Scripted::Unavailable,
            Scripted::State(playing("SMNE01", wall)),
        ]);
        let (mut watcher, mut rx, _prefs) = watcher(source.clone());
        let start = Instant::now();
        let interval = Preferences::default().check_interval();

        assert_eq!(watcher.tick_at(start, wall).await, PollOutcome::Updated);
        assert_eq!(
            watcher.tick_at(start + interval, wall).await,
            PollOutcome::Errored
        );
        // Still due: the failed poll did not count.
        assert_eq!(
            watcher.tick_at(start + interval + ERROR_BACKOFF, wall).await,
            PollOutcome::Updated
        );
        assert_eq!(source.calls(), 3);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_staleness_between_polls() {
        let played = Utc::now();
        let source = ScriptedSource::new([Scripted::State(playing("RMCE01", played))]);
        let (mut watcher, mut rx, _prefs) = watcher(source.clone());
        let start = Instant::now();

        assert_eq!(watcher.tick_at(start, played).await, PollOutcome::Updated);

        // No poll is due, but the last play just crossed the timeout.
        let later = played + ChronoDuration::minutes(30);
        assert_eq!(
            watcher.tick_at(start + Duration::from_secs(1), later).await,
            PollOutcome::Updated
        );
        assert_eq!(source.calls(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        let WatcherEvent::StateChanged(stale) = &events[1] else {
            panic!("expected a state change");
        };
        assert!(stale.outdated);
        assert!(!stale.should_display());

        // Staying stale is not another transition.
        assert_eq!(
            watcher.tick_at(start + Duration::from_secs(2), later).await,
            PollOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_server_outdated_flag_is_recomputed() {
        let wall = Utc::now();
        let mut claimed_outdated = playing("RMCE01", wall);
        claimed_outdated.outdated = true;
        let source = ScriptedSource::new([Scripted::State(claimed_outdated)]);
        let (mut watcher, mut rx, _prefs) = watcher(source);

        watcher.tick_at(Instant::now(), wall).await;
        let events = drain(&mut rx);
        let WatcherEvent::StateChanged(state) = &events[0] else {
            panic!("expected a state change");
        };
        assert!(!state.outdated);
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_outdated() {
        let wall = Utc::now();
        let mut no_time = playing("RMCE01", wall);
        if let Some(lp) = no_time.last_played.as_mut() {
            lp.played_at = None;
        }
        let source = ScriptedSource::new([Scripted::State(no_time)]);
        let (mut watcher, _rx, _prefs) = watcher(source);

        watcher.tick_at(Instant::now(), wall).await;
        assert!(watcher.previous().unwrap().outdated);
    }

    #[tokio::test]
    async fn test_huge_presence_timeout_does_not_panic() {
        let wall = Utc::now();
        let source = ScriptedSource::new([Scripted::State(playing(
            "RMCE01",
            wall - ChronoDuration::minutes(45),
        ))]);
        let (events_tx, mut rx) = mpsc::unbounded_channel();
        let (_prefs_tx, prefs_rx) = watch::channel(Preferences {
            presence_timeout: 200_000_000_000_000,
            ..Preferences::default()
        });
        let mut watcher = Watcher::new(source, "123", prefs_rx, events_tx);

        assert_eq!(watcher.tick_at(Instant::now(), wall).await, PollOutcome::Updated);
        // Falls back to the default timeout, which a 45 minute old play exceeds.
        assert!(watcher.previous().unwrap().outdated);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_reported_once() {
        let source = ScriptedSource::new([Scripted::NotFound]);
        let (mut watcher, mut rx, _prefs) = watcher(source.clone());
        let start = Instant::now();
        let wall = Utc::now();
        let interval = Preferences::default().check_interval();

        assert_eq!(watcher.tick_at(start, wall).await, PollOutcome::NotFound);
        for i in 1..4 {
            assert_eq!(
                watcher.tick_at(start + interval * i, wall).await,
                PollOutcome::Unchanged
            );
        }
        assert_eq!(source.calls(), 4);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], WatcherEvent::NotFound(_)));
        assert!(watcher.previous().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_after_found_clears_without_second_notice() {
        let wall = Utc::now();
        let source = ScriptedSource::new([
            Scripted::NotFound,
            Scripted::State(playing("RMCE01", wall)),
            Scripted::NotFound,
        ]);
        let (mut watcher, mut rx, _prefs) = watcher(source);
        let start = Instant::now();
        let interval = Preferences::default().check_interval();

        watcher.tick_at(start, wall).await;
        watcher.tick_at(start + interval, wall).await;
        watcher.tick_at(start + interval * 2, wall).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], WatcherEvent::NotFound(_)));
        assert!(matches!(&events[1], WatcherEvent::StateChanged(s) if s.should_display()));
        assert!(matches!(&events[2], WatcherEvent::StateChanged(s) if s.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_after_error() {
        let wall = Utc::now();
        let source = ScriptedSource::new([
            Scripted::Unavailable,
            Scripted::State(playing("RMCE01", wall)),
        ]);
        let (watcher, mut rx, _prefs) = watcher(source.clone());
        let start = Instant::now();
        let handle = watcher.spawn();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, WatcherEvent::StateChanged(_)));
        assert!(start.elapsed() >= ERROR_BACKOFF);
        assert_eq!(source.calls(), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_receiver_dropped() {
        let source = ScriptedSource::new([Scripted::State(playing("RMCE01", Utc::now()))]);
        let (watcher, rx, _prefs) = watcher(source);
        let handle = watcher.spawn();

        drop(rx);
        tokio::time::sleep(TICK * 3).await;
        assert!(handle.is_finished());
    }
}
