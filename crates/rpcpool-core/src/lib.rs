//! rpcpool core - a small RPC execution runtime.
//!
//! Methods from a [`MethodRegistry`] run on isolated worker threads owned by a
//! [`WorkerPool`]. Requests arrive as JSON frames over TCP (this crate) or HTTP
//! (`rpcpool-server`), are dispatched to a pool, and the correlated reply is
//! sent back as a Response frame.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpcpool_core::{registry, PoolOptions, WorkerPool};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rpcpool_core::Result<()> {
//!     let loader = registry::resolve("builtin")?;
//!     let pool = WorkerPool::spawn("default", loader, PoolOptions::with_size(2)).await?;
//!
//!     let sum = pool.exec("sum", json!([2, 3])).await?;
//!     assert_eq!(sum, json!(5));
//!
//!     pool.close().await;
//!     Ok(())
//! }
//! ```

pub mod actors;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod tcp;

// Re-export commonly used types
pub use actors::ActorRegistry;
pub use config::{RuntimeConfig, TransportConfig};
pub use dispatch::{process_request, Handled, RpcDispatch};
pub use error::{Result, RpcError};
pub use pool::{PoolOptions, PoolState, WorkerPool};
pub use protocol::{
    decode_request, decode_response, encode_request, encode_response, ErrorObject, Request,
    RequestId, Response,
};
pub use registry::{MethodError, MethodRegistry, MethodResult, RegistryLoader};
pub use tcp::{TcpClient, TcpOptions, TcpServer, TcpServerHandle};
