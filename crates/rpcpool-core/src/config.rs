//! Centralized configuration constants for the RPC runtime.
//!
//! Runtime values (ports, pool size, limits) are supplied by the binary's
//! CLI/env layer; this module only holds defaults and hard ceilings.

use std::time::Duration;

/// Worker pool and actor configuration.
pub struct RuntimeConfig;

impl RuntimeConfig {
    pub const DEFAULT_POOL_SIZE: usize = 2;
    pub const MAX_POOL_SIZE: usize = 256;
    pub const DEFAULT_ACTOR_NAME: &'static str = "default";
    pub const DEFAULT_REGISTRY: &'static str = "builtin";

    /// How long a freshly spawned pool waits for every worker to load its registry.
    pub const WORKER_READY_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Network transport configuration.
pub struct TransportConfig;

impl TransportConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
    pub const DEFAULT_TCP_PORT: u16 = 9090;

    /// Maximum HTTP request body, in bytes.
    pub const DEFAULT_BODY_LIMIT: usize = 1_000_000;
    /// Server-level HTTP exchange timeout.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_millis(5_000);

    /// Maximum bytes buffered on a TCP connection without a newline.
    pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;
    pub const MAX_TCP_CONNECTIONS: usize = 1024;
    /// Encoded responses queued per TCP connection before dispatch tasks wait.
    pub const TCP_WRITE_QUEUE: usize = 64;
    pub const TCP_READ_CHUNK: usize = 8192;
    pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}
