//! Loopback HTTP listener that receives the OAuth2 redirect.
//!
//! Only `GET /callback?code=...` is accepted. Requests are never logged, since
//! the query string carries the authorization code.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use super::client::CALLBACK_PATH;
use crate::error::ApiError;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEADER_LINES: usize = 100;

const SUCCESS_BODY: &str = "Authorization successful. You can close this tab and return to RiiTag RPC.";

/// What a single request to the listener amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(String),
    BadRequest,
    NotFound,
    MethodNotAllowed,
}

impl CallbackOutcome {
    fn status_line(&self) -> &'static str {
        match self {
            Self::Code(_) => "200 OK",
            Self::BadRequest => "400 Bad Request",
            Self::NotFound => "404 Not Found",
            Self::MethodNotAllowed => "405 Method Not Allowed",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Self::Code(_) => SUCCESS_BODY,
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
        }
    }
}

/// Classify a request line such as `GET /callback?code=abc HTTP/1.1`.
pub fn route(request_line: &str) -> CallbackOutcome {
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return CallbackOutcome::BadRequest;
    };
    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return CallbackOutcome::BadRequest;
    };

    if url.path() != CALLBACK_PATH {
        return CallbackOutcome::NotFound;
    }
    if method != "GET" {
        return CallbackOutcome::MethodNotAllowed;
    }

    let codes: Vec<String> = url
        .query_pairs()
        .filter(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .collect();
    match codes.as_slice() {
        [code] if !code.is_empty() => CallbackOutcome::Code(code.clone()),
        _ => CallbackOutcome::BadRequest,
    }
}

pub struct CallbackListener {
    port: u16,
    code_rx: oneshot::Receiver<String>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind the loopback addresses `localhost` can resolve to and start
    /// serving. IPv4 is required; IPv6 is used when the host has it. Port 0
    /// picks a free port.
    pub async fn bind(port: u16) -> Result<Self, ApiError> {
        let v4 = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| ApiError::Listener(format!("failed to bind localhost:{port}: {e}")))?;
        let port = v4.local_addr()?.port();
        let v6 = match TcpListener::bind((Ipv6Addr::LOCALHOST, port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::debug!(error = %e, port, "IPv6 loopback unavailable for callback");
                None
            }
        };

        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(v4, v6, code_tx, shutdown_rx));

        tracing::info!(port, "Waiting for Discord OAuth redirect");
        Ok(Self {
            port,
            code_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the first valid callback.
    pub async fn wait_for_code(&mut self) -> Result<String, ApiError> {
        (&mut self.code_rx)
            .await
            .map_err(|_| ApiError::Listener("listener stopped before a code arrived".into()))
    }

    /// Stop serving and release the port.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve(
    v4: TcpListener,
    v6: Option<TcpListener>,
    code_tx: oneshot::Sender<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut code_tx = Some(code_tx);
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = accept(&v4, v6.as_ref()) => match accepted {
                Ok((stream, _)) => {
                    if let Some(code) = handle_connection(stream).await {
                        if let Some(tx) = code_tx.take() {
                            let _ = tx.send(code);
                        }
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Callback accept failed"),
            },
        }
    }
}

async fn accept(v4: &TcpListener, v6: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match v6 {
        Some(v6) => tokio::select! {
            accepted = v4.accept() => accepted,
            accepted = v6.accept() => accepted,
        },
        None => v4.accept().await,
    }
}

async fn handle_connection(stream: TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let request_line = tokio::time::timeout(READ_TIMEOUT, read_head(&mut reader))
        .await
        .ok()??;

    let outcome = route(&request_line);
    let body = outcome.body();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        outcome.status_line(),
        body.len(),
        body
    );

    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;

    match outcome {
        CallbackOutcome::Code(code) => Some(code),
        _ => None,
    }
}

/// Read the request line and skip the headers.
async fn read_head(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.ok()? == 0 {
        return None;
    }

    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.ok()?;
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
    }
    Some(request_line)
}
