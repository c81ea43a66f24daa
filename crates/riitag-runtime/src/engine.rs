//! Wires the watcher to the presence host.
//!
//! The watcher runs as a task on the caller's runtime. Everything that talks
//! to Discord (connector, title cache, formatter) lives on one dedicated
//! thread with its own current-thread runtime, and is fed by the watcher over
//! a channel. The caller receives `EngineEvent`s on a second channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use riitag_api::StateSource;
use riitag_core::{AppConfig, Preferences, PresenceFormatter, RemoteState, TitleCache};

use crate::error::RuntimeError;
use crate::rpc::RpcConnector;
use crate::watcher::{Watcher, WatcherEvent, WatcherHandle};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(RemoteState),
    NotFound(String),
    RpcStatus(String),
    RpcConnected,
    FatalRpcError(String),
}

pub struct SyncEngine {
    watcher: WatcherHandle,
    presence: Option<std::thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Start the presence thread and the watcher. Must be called from within
    /// a tokio runtime.
    ///
    /// `http` is only used on the presence thread, for title databases and
    /// cover lookups. The connector may already be connected; if not, the
    /// presence thread connects with retry before handling any state.
    pub fn start<S: StateSource + 'static>(
        config: &AppConfig,
        http: reqwest::Client,
        source: S,
        user_id: impl Into<String>,
        prefs: watch::Receiver<Preferences>,
        mut connector: RpcConnector,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EngineEvent>), RuntimeError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let fatal_tx = event_tx.clone();
        connector.set_fatal_handler(move |e| {
            let _ = fatal_tx.send(EngineEvent::FatalRpcError(e.to_string()));
        });

        let presence = PresenceWorker {
            connector,
            titles: TitleCache::from_config(http.clone(), &config.titles),
            formatter: PresenceFormatter::from_config(http, &config.titles, &config.riitag),
            events: event_tx,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RuntimeError::Thread(format!("failed to build presence runtime: {e}")))?;

        let thread_stop = stop.clone();
        let presence = std::thread::Builder::new()
            .name("riitag-presence".into())
            .spawn(move || runtime.block_on(presence.run(watcher_rx, thread_stop)))
            .map_err(|e| RuntimeError::Thread(format!("failed to spawn presence thread: {e}")))?;

        let watcher = Watcher::new(source, user_id, prefs, watcher_tx).spawn();

        Ok((
            Self {
                watcher,
                presence: Some(presence),
                stop,
            },
            event_rx,
        ))
    }

    /// Stop the watcher, then wait for the presence thread to clear the
    /// presence and close the connection.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.watcher.stop().await;
        if let Some(handle) = self.presence.take() {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!("Presence thread did not shut down cleanly");
            }
        }
        tracing::info!("Sync engine stopped");
    }
}

struct PresenceWorker {
    connector: RpcConnector,
    titles: TitleCache,
    formatter: PresenceFormatter,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl PresenceWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WatcherEvent>, stop: Arc<AtomicBool>) {
        if !self.connector.is_connected() {
            let events = self.events.clone();
            let connected = self
                .connector
                .connect_with_retry(&stop, |status| {
                    let _ = events.send(EngineEvent::RpcStatus(status));
                })
                .await;
            if !connected {
                return;
            }
        }
        self.send(EngineEvent::RpcConnected);

        while let Some(event) = rx.recv().await {
            match event {
                WatcherEvent::StateChanged(state) => {
                    self.apply(&state).await;
                    self.send(EngineEvent::StateChanged(state));
                }
                WatcherEvent::NotFound(message) => {
                    if let Err(e) = self.connector.clear() {
                        tracing::debug!(error = %e, "Failed to clear presence");
                    }
                    self.send(EngineEvent::NotFound(message));
                }
            }
        }

        self.connector.close();
    }

    async fn apply(&mut self, state: &RemoteState) {
        let result = if state.should_display() {
            let payload = self.formatter.build(state, &mut self.titles).await;
            if payload.is_empty() {
                self.connector.clear()
            } else {
                self.connector.update(&payload)
            }
        } else {
            self.connector.clear()
        };

        // Already counted by the connector.
        if let Err(e) = result {
            tracing::debug!(error = %e, "Presence update failed");
        }
    }

    fn send(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeIpc, Scripted, ScriptedSource};
    use chrono::{Duration, Utc};
    use riitag_core::test_util::{client, StubResponse, StubServer};
    use riitag_core::{LastPlayed, RiitagUser};

    fn config(server: &StubServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.titles.wii_db_url = server.url("/wiitdb.txt");
        config.titles.wiiu_db_url = server.url("/wiiutdb.txt");
        config.titles.cover_url =
            server.url("/art/{console}/{img_type}/{region}/{game_id}.{file_type}");
        config
    }

    fn playing(played_ago: Duration) -> RemoteState {
        RemoteState {
            user: RiitagUser {
                name: Some("Larsen".into()),
                id: Some("123".into()),
            },
            games: vec!["RMCE01".into()],
            last_played: Some(LastPlayed {
                console: "wii".into(),
                game_id: "RMCE01".into(),
                region: Some("US".into()),
                played_at: Some(Utc::now() - played_ago),
            }),
            outdated: false,
        }
    }

    #[tokio::test]
    async fn test_engine_pushes_presence() {
        let server = StubServer::start();
        server.route("/wiitdb.txt", StubResponse::text("RMCE01 = Mario Kart Wii\n"));
        server.route("/wiiutdb.txt", StubResponse::text(""));
        server.route("/art/wii/coverHQ/US/RMCE01.png", StubResponse::text(""));

        let (fake, log) = FakeIpc::new();
        let source = ScriptedSource::new([Scripted::State(playing(Duration::minutes(1)))]);
        let (_prefs_tx, prefs_rx) = watch::channel(Preferences::default());

        let (engine, mut events) = SyncEngine::start(
            &config(&server),
            client(),
            source,
            "123",
            prefs_rx,
            RpcConnector::new(Box::new(fake)),
        )
        .unwrap();

        assert_eq!(
            events.recv().await,
            Some(EngineEvent::RpcStatus("Trying to connect... (1)".into()))
        );
        assert_eq!(events.recv().await, Some(EngineEvent::RpcConnected));
        assert!(matches!(events.recv().await, Some(EngineEvent::StateChanged(_))));

        {
            let log = log.lock().unwrap();
            assert_eq!(log.activities.len(), 1);
            let payload = &log.activities[0];
            assert_eq!(payload.details.as_deref(), Some("Playing Mario Kart Wii"));
            assert_eq!(payload.state.as_deref(), Some("Playing on Wii"));
            assert_eq!(
                payload.large_image,
                Some(server.url("/art/wii/coverHQ/US/RMCE01.png"))
            );
        }

        engine.stop().await;
        assert!(log.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_engine_clears_outdated_state() {
        let server = StubServer::start();
        let (fake, log) = FakeIpc::new();
        let source = ScriptedSource::new([Scripted::State(playing(Duration::hours(2)))]);
        let (_prefs_tx, prefs_rx) = watch::channel(Preferences::default());

        let mut connector = RpcConnector::new(Box::new(fake));
        assert!(connector.connect());
        let (engine, mut events) = SyncEngine::start(
            &config(&server),
            client(),
            source,
            "123",
            prefs_rx,
            connector,
        )
        .unwrap();

        assert_eq!(events.recv().await, Some(EngineEvent::RpcConnected));
        let Some(EngineEvent::StateChanged(state)) = events.recv().await else {
            panic!("expected a state change");
        };
        assert!(state.outdated);

        {
            let log = log.lock().unwrap();
            assert!(log.activities.is_empty());
            assert_eq!(log.clears, 1);
        }
        // Nothing to resolve for an outdated state.
        assert!(server.requests().is_empty());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_engine_reports_not_found() {
        let server = StubServer::start();
        let (fake, log) = FakeIpc::new();
        let source = ScriptedSource::new([Scripted::NotFound]);
        let (_prefs_tx, prefs_rx) = watch::channel(Preferences::default());

        let mut connector = RpcConnector::new(Box::new(fake));
        assert!(connector.connect());
        let (engine, mut events) = SyncEngine::start(
            &config(&server),
            client(),
            source,
            "123",
            prefs_rx,
            connector,
        )
        .unwrap();

        assert_eq!(events.recv().await, Some(EngineEvent::RpcConnected));
        assert!(matches!(events.recv().await, Some(EngineEvent::NotFound(_))));
        assert_eq!(log.lock().unwrap().clears, 1);

        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_escalates_repeated_rpc_errors() {
        let server = StubServer::start();
        let (fake, log) = FakeIpc::new();
        let mario = playing(Duration::minutes(1));
        let mut smash = playing(Duration::minutes(1));
        if let Some(lp) = smash.last_played.as_mut() {
            lp.game_id = "RSBE01".into();
        }
        let source = ScriptedSource::new([
            Scripted::State(mario.clone()),
            Scripted::State(smash),
            Scripted::State(mario),
        ]);
        let (_prefs_tx, prefs_rx) = watch::channel(Preferences {
            check_interval: 1,
            ..Preferences::default()
        });

        let mut connector = RpcConnector::new(Box::new(fake));
        assert!(connector.connect());
        log.lock().unwrap().fail_ops = true;

        let (engine, mut events) = SyncEngine::start(
            &config(&server),
            client(),
            source,
            "123",
            prefs_rx,
            connector,
        )
        .unwrap();

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, EngineEvent::StateChanged(_)) && received.len() == 4;
            received.push(event);
            if done {
                break;
            }
        }

        let fatal: Vec<_> = received
            .iter()
            .filter(|e| matches!(e, EngineEvent::FatalRpcError(_)))
            .collect();
        assert_eq!(fatal.len(), 1);
        // Escalated while handling the third state, before it is reported.
        assert!(matches!(received[3], EngineEvent::FatalRpcError(_)));
        assert!(log.lock().unwrap().activities.is_empty());

        engine.stop().await;
    }
}
