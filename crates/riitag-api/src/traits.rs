//! Seams between the watcher and the remote RiiTag service.

use std::future::Future;

use riitag_core::RemoteState;

use crate::error::ApiError;

/// Where the watcher gets remote state from.
pub trait StateSource: Send + Sync {
    /// Fetch the current state for `user_id`. A missing RiiTag is reported as
    /// [`ApiError::NotFound`].
    fn fetch_state(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<RemoteState, ApiError>> + Send;
}
