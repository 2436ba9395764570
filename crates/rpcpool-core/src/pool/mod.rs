//! Worker pool: executes registry methods on isolated worker threads.
//!
//! # Architecture
//!
//! - **Handle** (`WorkerPool`): cheap front end that sends commands and
//!   awaits the per-call oneshot reply
//! - **Dispatcher**: a tokio task that owns all dispatch state and assigns
//!   calls to workers round robin
//! - **Workers**: OS threads, each with its own registry and FIFO job queue
//!
//! Calls on one worker run in arrival order; calls on different workers run
//! in parallel with no relative ordering.

mod dispatcher;
mod worker;

use crate::config::RuntimeConfig;
use crate::error::{Result, RpcError};
use crate::registry::RegistryLoader;
use dispatcher::{Command, Dispatcher};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    /// At least one worker died and could not be respawned.
    Degraded,
    Closed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Running => "running",
            PoolState::Degraded => "degraded",
            PoolState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Pool construction options.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of worker threads.
    pub size: usize,
    /// Default deadline applied by [`WorkerPool::exec`]. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: RuntimeConfig::DEFAULT_POOL_SIZE,
            call_timeout: None,
        }
    }
}

impl PoolOptions {
    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size > RuntimeConfig::MAX_POOL_SIZE {
            return Err(RpcError::Config {
                message: format!(
                    "pool size must be between 1 and {}, got {}",
                    RuntimeConfig::MAX_POOL_SIZE,
                    self.size
                ),
            });
        }
        Ok(())
    }
}

/// Handle to a running pool.
pub struct WorkerPool {
    name: String,
    options: PoolOptions,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PoolState>,
}

impl WorkerPool {
    /// Start a pool whose workers each load their registry from `loader`.
    ///
    /// Fails if any worker cannot load its registry. Must be called from
    /// within a tokio runtime.
    pub async fn spawn(
        name: impl Into<String>,
        loader: RegistryLoader,
        options: PoolOptions,
    ) -> Result<Self> {
        options.validate()?;
        let name = name.into();

        let (state_tx, state) = watch::channel(PoolState::Running);
        let (dispatcher, events) =
            Dispatcher::start(name.clone(), loader, options.size, state_tx).await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher.run(command_rx, events));

        Ok(Self {
            name,
            options,
            commands,
            state,
        })
    }

    /// Execute `method` with the pool's default deadline.
    pub async fn exec(&self, method: &str, params: Value) -> Result<Value> {
        self.submit(method, params, self.options.call_timeout).await
    }

    /// Execute `method`, failing with [`RpcError::Timeout`] once `deadline` passes.
    ///
    /// A reply that arrives after the deadline is discarded. A deadline too
    /// far out to represent (`Duration::MAX`) is treated as none.
    pub async fn exec_with_deadline(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value> {
        self.submit(method, params, Some(deadline)).await
    }

    async fn submit(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Exec {
                method: method.to_string(),
                params,
                timeout,
                reply,
            })
            .map_err(|_| self.closed())?;

        response.await.map_err(|_| self.closed())?
    }

    /// Stop all workers and reject calls still in flight.
    ///
    /// Returns once the dispatcher has shut down; does not wait for workers
    /// to finish a call they are already executing. Closing twice is a no-op.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_ok() {
            let _ = finished.await;
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.options.size
    }

    fn closed(&self) -> RpcError {
        RpcError::PoolClosed {
            pool: self.name.clone(),
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.options.size)
            .field("state", &self.state())
            .finish()
    }
}
