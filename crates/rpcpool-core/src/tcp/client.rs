//! TCP line client.
//!
//! Sends one request per line and reads lines until the reply with the
//! matching id arrives.
//!
//! # Thread Safety
//!
//! The connection sits behind a tokio `Mutex`, so concurrent callers take
//! turns; only one request is in flight per client at a time.

use crate::config::TransportConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{decode_response, encode_request, Request, RequestId, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Client for a [`TcpServer`](super::TcpServer).
#[derive(Debug)]
pub struct TcpClient {
    stream: Mutex<BufReader<TcpStream>>,
    addr: SocketAddr,
    next_id: AtomicI64,
}

impl TcpClient {
    /// Connect to a server, giving up after the configured connect timeout.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(
            TransportConfig::TCP_CONNECT_TIMEOUT,
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| RpcError::Timeout(TransportConfig::TCP_CONNECT_TIMEOUT))??;

        debug!("TCP client connected to {}", addr);

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            addr,
            next_id: AtomicI64::new(1),
        })
    }

    /// Call a method and return its result, or the remote error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.request(Request::new(id, method, params)).await?;
        response.into_result()
    }

    /// Send a request frame and wait for the response carrying its id.
    ///
    /// Replies with other ids (or a null id) are skipped.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let mut line = encode_request(&request)?;
        line.push('\n');

        let mut stream = self.stream.lock().await;
        stream.get_mut().write_all(line.as_bytes()).await?;

        loop {
            let mut reply = String::new();
            if stream.read_line(&mut reply).await? == 0 {
                return Err(RpcError::Io {
                    message: format!("connection to {} closed", self.addr),
                    source: None,
                });
            }

            let response = decode_response(reply.trim_end().as_bytes())?;
            if response.id() == Some(&request.id) {
                return Ok(response);
            }
            warn!(
                "Skipping reply for id {:?} while waiting for {}",
                response.id().map(RequestId::to_string),
                request.id
            );
        }
    }

    /// Address of the connected server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
