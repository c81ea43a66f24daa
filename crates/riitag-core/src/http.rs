//! Shared HTTP client construction.

use crate::error::CoreError;

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!("RiiTag-RPC/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the title cache, cover probing and the
/// remote API clients.
pub fn build_client() -> Result<reqwest::Client, CoreError> {
    let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    Ok(client)
}
