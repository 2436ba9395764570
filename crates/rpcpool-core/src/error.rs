//! Error types for the RPC runtime.
//!
//! Covers the whole failure taxonomy: malformed frames, dispatch failures
//! reported by a worker, pool faults (timeouts, dead workers, closed pools)
//! and transport-level I/O problems. Every variant maps to a JSON-RPC style
//! error code so transports can turn it into a Failure frame.

use crate::protocol::ErrorObject;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the RPC runtime.
#[derive(Debug, Error)]
pub enum RpcError {
    // Protocol errors
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },

    // Dispatch errors (reported by a worker, the call completed)
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("{message}")]
    Call {
        message: String,
        code: Option<i64>,
        data: Option<Value>,
    },

    // Pool errors
    #[error("Worker {worker} of pool '{pool}' is unavailable")]
    WorkerUnavailable { pool: String, worker: usize },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pool '{pool}' is closed")]
    PoolClosed { pool: String },

    #[error("No actors registered")]
    NoActors,

    #[error("Registry error: {message}")]
    Registry { message: String },

    // Transport and configuration errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Standard codes:
    /// - -32700: Parse error
    /// - -32600: Invalid frame
    /// - -32601: Method not found
    /// - -32603: Internal error
    ///
    /// Runtime codes (-32000 to -32099):
    /// - -32000: Method returned an error without its own code
    /// - -32001: Worker unavailable
    /// - -32002: Call timed out
    /// - -32003: Pool closed
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            RpcError::Parse { .. } => -32700,
            RpcError::InvalidFrame { .. } => -32600,
            RpcError::MethodNotFound { .. } => -32601,
            RpcError::Call { code, .. } => code.unwrap_or(-32000),
            RpcError::WorkerUnavailable { .. } => -32001,
            RpcError::Timeout(_) => -32002,
            RpcError::PoolClosed { .. } => -32003,
            _ => -32603,
        }
    }

    /// Whether the error was produced while decoding a frame.
    pub fn is_protocol(&self) -> bool {
        matches!(self, RpcError::Parse { .. } | RpcError::InvalidFrame { .. })
    }

    /// Whether the call reached a worker and completed with an application
    /// level failure, as opposed to a fault in the runtime itself.
    pub fn is_application(&self) -> bool {
        matches!(self, RpcError::MethodNotFound { .. } | RpcError::Call { .. })
    }

    /// Build the wire error body for this error.
    pub fn to_error_object(&self) -> ErrorObject {
        let data = match self {
            RpcError::Call { data, .. } => data.clone(),
            _ => None,
        };
        ErrorObject {
            message: self.to_string(),
            code: Some(self.to_rpc_error_code()),
            data,
        }
    }

    /// Rebuild an error from a Failure frame body received from a worker.
    pub fn from_error_object(error: ErrorObject) -> Self {
        RpcError::Call {
            message: error.message,
            code: error.code,
            data: error.data,
        }
    }
}
