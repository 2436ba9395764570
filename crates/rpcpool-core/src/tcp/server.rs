//! TCP line server.
//!
//! Accepts connections, splits the byte stream on `\n` and dispatches every
//! line in its own task. A single writer task per connection serializes the
//! replies onto the socket.
//!
//! # Limits
//!
//! A connection that buffers more than `max_line_bytes` without a newline
//! gets a Failure frame with a null id and is closed. Connections beyond
//! `max_connections` are dropped on accept.

use crate::config::TransportConfig;
use crate::dispatch::{process_request, RpcDispatch};
use crate::error::{Result, RpcError};
use crate::protocol::{encode_response, Response};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Per-server limits.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub max_line_bytes: usize,
    pub max_connections: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: TransportConfig::DEFAULT_MAX_LINE_BYTES,
            max_connections: TransportConfig::MAX_TCP_CONNECTIONS,
        }
    }
}

/// Owner of a bound line server.
///
/// Shutting down stops the accept loop and tells every connection to stop
/// reading. Lines already read still get their reply before the socket is
/// closed. Dropping the handle shuts down.
pub struct TcpServerHandle {
    pub addr: SocketAddr,
    stop_accepting: Option<oneshot::Sender<()>>,
    stop_reading: watch::Sender<bool>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl TcpServerHandle {
    /// Bound address; the real port when bound to port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.stop_accepting.take() {
            let _ = tx.send(());
        }
        let _ = self.stop_reading.send(true);
    }
}

impl Drop for TcpServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// One counted connection; releases its place under the cap when dropped.
struct ConnectionPermit {
    open: Arc<AtomicUsize>,
}

impl ConnectionPermit {
    /// Take a place under `limit`, or `None` when the server is full.
    fn acquire(open: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        open.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Self { open: open.clone() })
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Newline-delimited JSON server.
pub struct TcpServer;

impl TcpServer {
    /// Bind `addr` (port 0 picks a free port) and serve in background tasks.
    pub async fn bind<D: RpcDispatch>(
        addr: SocketAddr,
        dispatch: Arc<D>,
        options: TcpOptions,
    ) -> Result<TcpServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("TCP server listening on {}", addr);

        let (stop_accepting, stopped) = oneshot::channel::<()>();
        let (stop_reading, reading) = watch::channel(false);

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            dispatch,
            Arc::new(options),
            stopped,
            reading,
        ));

        Ok(TcpServerHandle {
            addr,
            stop_accepting: Some(stop_accepting),
            stop_reading,
            accept_task: Some(accept_task),
        })
    }

    /// Accept until told to stop; each admitted peer gets its own line reader.
    async fn accept_loop<D: RpcDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        options: Arc<TcpOptions>,
        mut stopped: oneshot::Receiver<()>,
        reading: watch::Receiver<bool>,
    ) {
        let open = Arc::new(AtomicUsize::new(0));

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                        continue;
                    }
                },
            };

            // Over the cap the stream is dropped unread, closing it.
            let Some(permit) = ConnectionPermit::acquire(&open, options.max_connections) else {
                warn!(
                    "Refusing {}: {} line connections already open",
                    peer, options.max_connections
                );
                continue;
            };

            let dispatch = dispatch.clone();
            let options = options.clone();
            let mut reading = reading.clone();
            tokio::spawn(async move {
                let _permit = permit;
                debug!("Line connection from {}", peer);
                match Self::handle_connection(stream, dispatch, &options, &mut reading).await {
                    Ok(()) => debug!("Line connection {} closed", peer),
                    Err(e) => debug!("Line connection {} ended: {}", peer, e),
                }
            });
        }

        info!("TCP server stopped accepting");
    }

    async fn handle_connection<D: RpcDispatch>(
        stream: TcpStream,
        dispatch: Arc<D>,
        options: &TcpOptions,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<String>(TransportConfig::TCP_WRITE_QUEUE);
        let writer_task = tokio::spawn(Self::write_loop(writer, out_rx));

        let mut buffer = BytesMut::with_capacity(TransportConfig::TCP_READ_CHUNK);
        // Bytes at the front of `buffer` already known to hold no newline.
        let mut scanned = 0;

        let outcome = loop {
            let read = tokio::select! {
                result = reader.read_buf(&mut buffer) => match result {
                    Ok(n) => n,
                    Err(e) => break Err(RpcError::from(e)),
                },
                _ = shutdown_rx.changed() => break Ok(()),
            };
            if read == 0 {
                if !buffer.is_empty() {
                    debug!("Discarding {} bytes of unterminated input", buffer.len());
                }
                break Ok(());
            }

            while let Some(offset) = buffer[scanned..].iter().position(|b| *b == b'\n') {
                let mut line = buffer.split_to(scanned + offset + 1);
                scanned = 0;
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }

                let dispatch = dispatch.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let handled = process_request(&*dispatch, &line).await;
                    if let Some(encoded) = encode_line(handled.response()) {
                        let _ = out_tx.send(encoded).await;
                    }
                });
            }
            scanned = buffer.len();

            if buffer.len() > options.max_line_bytes {
                warn!(
                    "Closing TCP connection: {} bytes buffered without a newline (limit {})",
                    buffer.len(),
                    options.max_line_bytes
                );
                let error = RpcError::InvalidFrame {
                    message: format!("line exceeds {} bytes", options.max_line_bytes),
                };
                if let Some(encoded) = encode_line(&Response::from_error(None, &error)) {
                    let _ = out_tx.send(encoded).await;
                }
                buffer.clear();
                break Ok(());
            }
        };

        // The writer finishes once every in-flight line has replied.
        drop(out_tx);
        let _ = writer_task.await;
        outcome
    }

    async fn write_loop(mut writer: OwnedWriteHalf, mut lines: mpsc::Receiver<String>) {
        while let Some(line) = lines.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                debug!("TCP write failed: {}", e);
                return;
            }
        }
        let _ = writer.shutdown().await;
    }
}

fn encode_line(response: &Response) -> Option<String> {
    match encode_response(response) {
        Ok(mut encoded) => {
            encoded.push('\n');
            Some(encoded)
        }
        Err(e) => {
            error!("Failed to encode response: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolOptions, WorkerPool};
    use crate::registry::MethodRegistry;
    use serde_json::{json, Value};
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn registry() -> Result<MethodRegistry> {
        Ok(MethodRegistry::new()
            .with_method("sum", |params| {
                Ok(json!(params[0].as_i64().unwrap_or(0) + params[1].as_i64().unwrap_or(0)))
            })
            .with_method("sleep", |params| {
                std::thread::sleep(Duration::from_millis(params.as_u64().unwrap_or(0)));
                Ok(Value::Null)
            }))
    }

    async fn start(options: TcpOptions) -> TcpServerHandle {
        let pool = WorkerPool::spawn("tcp-test", registry, PoolOptions::with_size(2))
            .await
            .unwrap();
        TcpServer::bind((Ipv4Addr::LOCALHOST, 0).into(), Arc::new(pool), options)
            .await
            .unwrap()
    }

    async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_sum_roundtrip() {
        let mut handle = start(TcpOptions::default()).await;
        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(b"{\"id\":1,\"method\":\"sum\",\"params\":[2,3]}\n")
            .await
            .unwrap();
        assert_eq!(read_line(&mut reader).await, "{\"id\":1,\"result\":5}\n");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_bad_line_keeps_connection_open() {
        let mut handle = start(TcpOptions::default()).await;
        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"this is not json\n\n").await.unwrap();
        let reply: Value = serde_json::from_str(&read_line(&mut reader).await).unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], json!(-32700));

        writer
            .write_all(b"{\"id\":\"u\",\"method\":\"nope\"}\r\n")
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&read_line(&mut reader).await).unwrap();
        assert_eq!(reply["id"], json!("u"));
        assert!(reply["error"]["message"].as_str().unwrap().contains("nope"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_lines_split_across_writes_and_batched() {
        let mut handle = start(TcpOptions::default()).await;
        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"{\"id\":1,\"method\":\"su").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer
            .write_all(b"m\",\"params\":[1,1]}\n{\"id\":2,\"method\":\"sum\",\"params\":[2,2]}\n")
            .await
            .unwrap();

        let mut results = Vec::new();
        for _ in 0..2 {
            let reply: Value = serde_json::from_str(&read_line(&mut reader).await).unwrap();
            results.push((reply["id"].as_i64().unwrap(), reply["result"].as_i64().unwrap()));
        }
        results.sort_unstable();
        assert_eq!(results, vec![(1, 2), (2, 4)]);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_replies_may_arrive_out_of_order() {
        let mut handle = start(TcpOptions::default()).await;
        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(
                b"{\"id\":\"slow\",\"method\":\"sleep\",\"params\":300}\n{\"id\":\"fast\",\"method\":\"sum\",\"params\":[1,2]}\n",
            )
            .await
            .unwrap();

        let first: Value = serde_json::from_str(&read_line(&mut reader).await).unwrap();
        let second: Value = serde_json::from_str(&read_line(&mut reader).await).unwrap();
        assert_eq!(first["id"], json!("fast"));
        assert_eq!(second["id"], json!("slow"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        let options = TcpOptions {
            max_line_bytes: 64,
            ..TcpOptions::default()
        };
        let mut handle = start(options).await;
        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(&[b'x'; 200]).await.unwrap();

        let reply: Value = serde_json::from_str(&read_line(&mut reader).await).unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert!(reply["error"]["message"].as_str().unwrap().contains("64"));
        assert_eq!(read_line(&mut reader).await, "", "connection should be closed");

        handle.shutdown();
    }

    async fn sum_succeeds(addr: SocketAddr) -> bool {
        let Ok(stream) = TcpStream::connect(addr).await else {
            return false;
        };
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        if writer
            .write_all(b"{\"id\":9,\"method\":\"sum\",\"params\":[4,4]}\n")
            .await
            .is_err()
        {
            return false;
        }
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(1), reader.read_line(&mut line)).await;
        matches!(read, Ok(Ok(n)) if n > 0) && line == "{\"id\":9,\"result\":8}\n"
    }

    #[tokio::test]
    async fn test_connections_over_cap_are_closed() {
        let options = TcpOptions {
            max_connections: 1,
            ..TcpOptions::default()
        };
        let mut handle = start(options).await;

        // Once this connection has a reply it holds the only place.
        let first = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = first.into_split();
        let mut reader = BufReader::new(reader);
        writer
            .write_all(b"{\"id\":1,\"method\":\"sum\",\"params\":[1,2]}\n")
            .await
            .unwrap();
        assert_eq!(read_line(&mut reader).await, "{\"id\":1,\"result\":3}\n");

        let mut second = TcpStream::connect(handle.addr()).await.unwrap();
        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut byte))
            .await
            .expect("refused connection should be closed");
        assert!(matches!(read, Ok(0) | Err(_)), "got {:?}", read);

        // Closing the first connection frees its place.
        drop(writer);
        drop(reader);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !sum_succeeds(handle.addr()).await {
            assert!(tokio::time::Instant::now() < deadline, "place never freed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        handle.shutdown();
    }
}
