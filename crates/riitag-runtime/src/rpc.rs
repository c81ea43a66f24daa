//! Discord Rich Presence connection management.
//!
//! IPC calls are blocking, so the connector is meant to live on a dedicated
//! thread (see `engine`). Failures are counted for the lifetime of the
//! process; every third one is escalated to the fatal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use discord_rich_presence::{activity, DiscordIpc, DiscordIpcClient};

use riitag_core::PresencePayload;

use crate::error::RpcError;

const RETRY_DELAY: Duration = Duration::from_secs(4);

/// Cumulative error count at which the fatal handler fires (and every
/// multiple of it after that).
pub const FATAL_ERROR_THRESHOLD: u32 = 3;

/// The presence host as seen by the connector.
pub trait PresenceIpc: Send {
    fn connect(&mut self) -> Result<(), RpcError>;
    fn set_activity(&mut self, payload: &PresencePayload) -> Result<(), RpcError>;
    fn clear_activity(&mut self) -> Result<(), RpcError>;
    fn close(&mut self) -> Result<(), RpcError>;
}

/// `PresenceIpc` over the local Discord client.
pub struct DiscordIpcPresence {
    client: DiscordIpcClient,
}

impl DiscordIpcPresence {
    pub fn new(client_id: &str) -> Self {
        Self {
            client: DiscordIpcClient::new(client_id),
        }
    }
}

impl PresenceIpc for DiscordIpcPresence {
    fn connect(&mut self) -> Result<(), RpcError> {
        self.client.connect().map_err(ipc_error)
    }

    fn set_activity(&mut self, payload: &PresencePayload) -> Result<(), RpcError> {
        let mut presence = activity::Activity::new();
        if let Some(details) = payload.details.as_deref() {
            presence = presence.details(details);
        }
        if let Some(state) = payload.state.as_deref() {
            presence = presence.state(state);
        }
        if let Some(start) = payload.start {
            presence = presence.timestamps(activity::Timestamps::new().start(start));
        }

        let mut assets = activity::Assets::new();
        if let Some(image) = payload.large_image.as_deref() {
            assets = assets.large_image(image);
        }
        if let Some(text) = payload.large_text.as_deref() {
            assets = assets.large_text(text);
        }
        if let Some(image) = payload.small_image.as_deref() {
            assets = assets.small_image(image);
        }
        if let Some(text) = payload.small_text.as_deref() {
            assets = assets.small_text(text);
        }
        presence = presence.assets(assets);

        if !payload.buttons.is_empty() {
            presence = presence.buttons(
                payload
                    .buttons
                    .iter()
                    .map(|b| activity::Button::new(&b.label, &b.url))
                    .collect::<Vec<_>>(),
            );
        }

        self.client.set_activity(presence).map_err(ipc_error)
    }

    fn clear_activity(&mut self) -> Result<(), RpcError> {
        self.client.clear_activity().map_err(ipc_error)
    }

    fn close(&mut self) -> Result<(), RpcError> {
        self.client.close().map_err(ipc_error)
    }
}

fn ipc_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::Ipc(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

pub type FatalHandler = Box<dyn FnMut(&RpcError) + Send>;

pub struct RpcConnector {
    ipc: Box<dyn PresenceIpc>,
    state: ConnectionState,
    error_count: u32,
    on_fatal: Option<FatalHandler>,
}

impl RpcConnector {
    pub fn new(ipc: Box<dyn PresenceIpc>) -> Self {
        Self {
            ipc,
            state: ConnectionState::Disconnected,
            error_count: 0,
            on_fatal: None,
        }
    }

    pub fn with_fatal_handler(mut self, handler: impl FnMut(&RpcError) + Send + 'static) -> Self {
        self.set_fatal_handler(handler);
        self
    }

    pub fn set_fatal_handler(&mut self, handler: impl FnMut(&RpcError) + Send + 'static) {
        self.on_fatal = Some(Box::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// One handshake attempt. An absent host is `false`, not an error.
    pub fn connect(&mut self) -> bool {
        match self.ipc.connect() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                tracing::info!("Connected to Discord IPC");
                true
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                tracing::debug!(error = %e, "Discord not available");
                false
            }
        }
    }

    /// Keep trying every 4 seconds until connected or `stop` is set. Each
    /// attempt is announced through `on_status`.
    pub async fn connect_with_retry(
        &mut self,
        stop: &AtomicBool,
        mut on_status: impl FnMut(String),
    ) -> bool {
        let mut attempt: u32 = 0;
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            attempt += 1;
            on_status(format!("Trying to connect... ({attempt})"));
            if self.connect() {
                return true;
            }
            tracing::info!(attempt, "Waiting for Discord, make sure the client is running");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// Push a payload, reconnecting first if the last operation dropped the
    /// connection.
    pub fn update(&mut self, payload: &PresencePayload) -> Result<(), RpcError> {
        self.ensure_connected()?;
        let result = self.ipc.set_activity(payload);
        self.track(result)
    }

    /// Remove the presence. A dropped connection has nothing left to clear.
    pub fn clear(&mut self) -> Result<(), RpcError> {
        if !self.is_connected() {
            return Ok(());
        }
        let result = self.ipc.clear_activity();
        self.track(result)
    }

    /// Count an error and mark the connection dead.
    pub fn handle_error(&mut self, error: &RpcError) {
        self.error_count += 1;
        self.state = ConnectionState::Disconnected;
        tracing::warn!(error = %error, error_count = self.error_count, "Discord RPC error");

        if self.error_count % FATAL_ERROR_THRESHOLD == 0 {
            if let Some(handler) = self.on_fatal.as_mut() {
                handler(error);
            }
        }
    }

    /// Clear and close. Errors are ignored; the host is going away either way.
    pub fn close(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.ipc.clear_activity() {
                tracing::debug!(error = %e, "Failed to clear activity on close");
            }
            if let Err(e) = self.ipc.close() {
                tracing::debug!(error = %e, "Failed to close Discord IPC");
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    fn ensure_connected(&mut self) -> Result<(), RpcError> {
        if self.is_connected() || self.connect() {
            return Ok(());
        }
        let error = RpcError::NotConnected;
        self.handle_error(&error);
        Err(error)
    }

    fn track(&mut self, result: Result<(), RpcError>) -> Result<(), RpcError> {
        if let Err(e) = &result {
            self.handle_error(e);
        }
        result
    }
}
