//! Electrum protocol client over plain TCP.
//!
//! # Responsibilities
//! - Connect to `tcp://host:port` endpoints under a timeout
//! - Newline-delimited JSON-RPC 2.0 request/response
//! - `server.ping` as the pool's liveness probe

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use url::Url;

use crate::pool::{ConnectionError, NodeConnection};

/// Server used when no bootstrap endpoint is configured.
pub const DEFAULT_HOST: &str = "bch.imaginary.cash";
pub const DEFAULT_PORT: u16 = 50001;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// One Electrum (Fulcrum) server connection.
///
/// Calls are serialized over a single socket.
pub struct ElectrumConnection {
    endpoint: Option<Url>,
    timeout: Duration,
    stream: Mutex<Option<BufReader<TcpStream>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ElectrumConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectrumConnection")
            .field("endpoint", &self.label())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ElectrumConnection {
    /// `None` targets the built-in default server.
    pub fn new(endpoint: Option<&Url>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.cloned(),
            timeout,
            stream: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn label(&self) -> String {
        match &self.endpoint {
            Some(url) => url.to_string(),
            None => format!("tcp://{}:{}", DEFAULT_HOST, DEFAULT_PORT),
        }
    }

    fn address(&self) -> Result<(String, u16), ConnectionError> {
        let Some(url) = &self.endpoint else {
            return Ok((DEFAULT_HOST.to_string(), DEFAULT_PORT));
        };
        if url.scheme() != "tcp" {
            return Err(ConnectionError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ConnectionError::Protocol(format!("missing host in {}", url)))?;
        let port = url
            .port()
            .ok_or_else(|| ConnectionError::Protocol(format!("missing port in {}", url)))?;
        Ok((host.to_string(), port))
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let (host, port) = self.address()?;
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| ConnectionError::Timeout(self.timeout.as_secs()))??;
        stream.set_nodelay(true)?;

        *self.stream.lock().await = Some(BufReader::new(stream));
        tracing::debug!(endpoint = %self.label(), "Connected");
        Ok(())
    }

    /// Issue one JSON-RPC request and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(ConnectionError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outcome = tokio::time::timeout(self.timeout, exchange(stream, id, method, &params))
            .await
            .unwrap_or(Err(ConnectionError::Timeout(self.timeout.as_secs())));

        // A broken or desynchronized socket cannot be reused.
        if matches!(
            outcome,
            Err(ConnectionError::Io(_) | ConnectionError::Timeout(_) | ConnectionError::Protocol(_))
        ) {
            *guard = None;
        }
        outcome
    }
}

async fn exchange(
    stream: &mut BufReader<TcpStream>,
    id: u64,
    method: &str,
    params: &Value,
) -> Result<Value, ConnectionError> {
    let request = RpcRequest {
        jsonrpc: "2.0",
        id,
        method,
        params,
    };
    let mut line = serde_json::to_vec(&request)
        .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
    line.push(b'\n');
    stream.get_mut().write_all(&line).await?;

    let mut buf = String::new();
    loop {
        buf.clear();
        if stream.read_line(&mut buf).await? == 0 {
            return Err(ConnectionError::Protocol("connection closed by server".into()));
        }
        let response: RpcResponse = serde_json::from_str(buf.trim_end())
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        // Subscription notifications carry no id.
        if response.id != Some(id) {
            continue;
        }
        if let Some(error) = response.error {
            return Err(ConnectionError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        return Ok(response.result.unwrap_or(Value::Null));
    }
}

impl NodeConnection for ElectrumConnection {
    fn start(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(self.connect())
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.stream.lock().await.take().is_some() {
                tracing::debug!(endpoint = %self.label(), "Disconnected");
            }
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.call("server.ping", Value::Array(Vec::new())).await?;
            Ok(())
        })
    }
}
