pub mod engine;
pub mod error;
pub mod rpc;
pub mod watcher;

#[cfg(test)]
mod fakes;

pub use engine::{EngineEvent, SyncEngine};
pub use error::{RpcError, RuntimeError};
pub use rpc::{ConnectionState, DiscordIpcPresence, PresenceIpc, RpcConnector};
pub use watcher::{PollOutcome, Watcher, WatcherEvent, WatcherHandle};
