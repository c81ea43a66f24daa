use riitag_api::ApiError;
use riitag_core::CoreError;

/// Failures talking to the local presence host.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("IPC error: {0}")]
    Ipc(String),
    #[error("not connected to Discord")]
    NotConnected,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("thread error: {0}")]
    Thread(String),
}
