//! The pool's single owner of dispatch state.
//!
//! One dispatcher task per pool holds the worker slots, the call id counter,
//! the round-robin cursor, the pending-call map and the deadline queue.
//! Nothing else touches them: `WorkerPool` handles talk to the dispatcher
//! through a command channel and workers report back through an event
//! channel.

use super::worker::{self, WorkerEvent, WorkerHandle};
use super::PoolState;
use crate::config::RuntimeConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{Request, RequestId};
use crate::registry::RegistryLoader;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests from `WorkerPool` handles.
pub(super) enum Command {
    Exec {
        method: String,
        params: Value,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

struct PendingCall {
    slot: usize,
    timeout: Option<Duration>,
    reply: oneshot::Sender<Result<Value>>,
}

enum Slot {
    Live(WorkerHandle),
    Dead,
}

pub(super) struct Dispatcher {
    name: String,
    loader: RegistryLoader,
    slots: Vec<Slot>,
    next_call_id: u64,
    cursor: usize,
    pending: HashMap<u64, PendingCall>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    state: watch::Sender<PoolState>,
}

impl Dispatcher {
    /// Spawn `size` workers and wait until each has loaded its registry.
    pub async fn start(
        name: String,
        loader: RegistryLoader,
        size: usize,
        state: watch::Sender<PoolState>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let mut slots = Vec::with_capacity(size);
        for slot in 0..size {
            let handle = worker::spawn(&name, slot, 0, loader, events_tx.clone())?;
            slots.push(Slot::Live(handle));
        }

        let mut ready = 0;
        while ready < size {
            let event = tokio::time::timeout(RuntimeConfig::WORKER_READY_TIMEOUT, events.recv())
                .await
                .map_err(|_| RpcError::Registry {
                    message: format!(
                        "pool '{}' timed out waiting for workers to load their registry",
                        name
                    ),
                })?;

            match event {
                Some(WorkerEvent::Ready { .. }) => ready += 1,
                Some(WorkerEvent::LoadFailed { slot, error, .. }) => {
                    return Err(RpcError::Registry {
                        message: format!(
                            "worker {} of pool '{}' failed to load its registry: {}",
                            slot, name, error
                        ),
                    });
                }
                Some(WorkerEvent::Exited { slot, .. }) => {
                    return Err(RpcError::Registry {
                        message: format!("worker {} of pool '{}' exited during startup", slot, name),
                    });
                }
                Some(WorkerEvent::Reply { .. }) => {}
                None => {
                    return Err(RpcError::Other(format!(
                        "pool '{}' lost its worker event channel",
                        name
                    )))
                }
            }
        }

        info!("Pool '{}' started with {} workers", name, size);

        Ok((
            Self {
                name,
                loader,
                slots,
                next_call_id: 0,
                cursor: 0,
                pending: HashMap::new(),
                deadlines: BinaryHeap::new(),
                events_tx,
                state,
            },
            events,
        ))
    }

    /// Serve commands and worker events until closed.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            let next_deadline = self.next_deadline();
            let expiry = async move {
                match next_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Exec { method, params, timeout, reply }) => {
                        self.dispatch(method, params, timeout, reply);
                    }
                    Some(Command::Close { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = expiry => self.expire(Instant::now()),
            }
        }
    }

    fn dispatch(
        &mut self,
        method: String,
        params: Value,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        let call_id = self.next_call_id;
        self.next_call_id += 1;

        let Some(slot) = self.next_live_slot() else {
            let _ = reply.send(Err(RpcError::WorkerUnavailable {
                pool: self.name.clone(),
                worker: self.cursor % self.slots.len().max(1),
            }));
            return;
        };

        debug!("Pool '{}': call {} {} -> worker {}", self.name, call_id, method, slot);

        self.pending.insert(
            call_id,
            PendingCall {
                slot,
                timeout,
                reply,
            },
        );
        // A deadline too far out to represent is no deadline at all.
        if let Some(at) = timeout.and_then(|timeout| Instant::now().checked_add(timeout)) {
            self.deadlines.push(Reverse((at, call_id)));
        }

        // Call ids stay far below i64::MAX.
        let request = Request::new(RequestId::Number(call_id as i64), method, params);
        let sent = match &self.slots[slot] {
            Slot::Live(handle) => handle.send(request).is_ok(),
            Slot::Dead => false,
        };
        if !sent {
            if let Some(call) = self.pending.remove(&call_id) {
                let _ = call.reply.send(Err(self.unavailable(slot)));
            }
        }
    }

    /// Plain round robin over live slots.
    fn next_live_slot(&mut self) -> Option<usize> {
        let len = self.slots.len();
        for _ in 0..len {
            let slot = self.cursor % len;
            self.cursor = self.cursor.wrapping_add(1);
            if matches!(self.slots[slot], Slot::Live(_)) {
                return Some(slot);
            }
        }
        None
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply { slot, response } => {
                let Some(call_id) = response.id().and_then(RequestId::as_call_id) else {
                    warn!("Pool '{}': worker {} replied without a call id", self.name, slot);
                    return;
                };
                match self.pending.remove(&call_id) {
                    Some(call) => {
                        let _ = call.reply.send(response.into_result());
                    }
                    None => debug!("Pool '{}': dropping reply for unknown call {}", self.name, call_id),
                }
            }
            WorkerEvent::Ready { slot, generation } => {
                if self.is_current(slot, generation) {
                    info!("Pool '{}': worker {} is back (generation {})", self.name, slot, generation);
                }
            }
            WorkerEvent::LoadFailed {
                slot,
                generation,
                error,
            } => {
                if self.is_current(slot, generation) {
                    warn!(
                        "Pool '{}': worker {} failed to reload its registry: {}",
                        self.name, slot, error
                    );
                    self.slots[slot] = Slot::Dead;
                    self.reject_slot(slot);
                    self.state.send_replace(PoolState::Degraded);
                }
            }
            WorkerEvent::Exited { slot, generation } => {
                if self.is_current(slot, generation) {
                    warn!("Pool '{}': worker {} exited unexpectedly", self.name, slot);
                    self.reject_slot(slot);
                    self.respawn(slot, generation + 1);
                }
            }
        }
    }

    fn is_current(&self, slot: usize, generation: u64) -> bool {
        matches!(self.slots.get(slot), Some(Slot::Live(handle)) if handle.generation == generation)
    }

    fn respawn(&mut self, slot: usize, generation: u64) {
        match worker::spawn(&self.name, slot, generation, self.loader, self.events_tx.clone()) {
            Ok(handle) => self.slots[slot] = Slot::Live(handle),
            Err(e) => {
                warn!("Pool '{}': could not respawn worker {}: {}", self.name, slot, e);
                self.slots[slot] = Slot::Dead;
                self.state.send_replace(PoolState::Degraded);
            }
        }
    }

    /// Reject every pending call assigned to `slot`.
    fn reject_slot(&mut self, slot: usize) {
        let orphaned: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, call)| call.slot == slot)
            .map(|(id, _)| *id)
            .collect();
        for call_id in orphaned {
            if let Some(call) = self.pending.remove(&call_id) {
                let _ = call.reply.send(Err(self.unavailable(slot)));
            }
        }
    }

    fn unavailable(&self, slot: usize) -> RpcError {
        RpcError::WorkerUnavailable {
            pool: self.name.clone(),
            worker: slot,
        }
    }

    /// Earliest deadline that still belongs to a pending call.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, call_id))) = self.deadlines.peek().copied() {
            if self.pending.contains_key(&call_id) {
                return Some(at);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Evict calls whose deadline passed, and calls whose caller went away.
    ///
    /// Only runs when some deadline fires. Without deadlines an abandoned
    /// call stays pending until its worker replies.
    fn expire(&mut self, now: Instant) {
        while let Some(Reverse((at, call_id))) = self.deadlines.peek().copied() {
            if at > now {
                break;
            }
            self.deadlines.pop();
            if let Some(call) = self.pending.remove(&call_id) {
                let timeout = call.timeout.unwrap_or_default();
                debug!("Pool '{}': call {} timed out after {:?}", self.name, call_id, timeout);
                let _ = call.reply.send(Err(RpcError::Timeout(timeout)));
            }
        }

        self.pending.retain(|_, call| !call.reply.is_closed());
    }

    fn shutdown(&mut self) {
        self.state.send_replace(PoolState::Closed);
        // Dropping the handles closes every job channel; workers finish
        // their current call and exit.
        self.slots.clear();
        self.deadlines.clear();
        for (_, call) in self.pending.drain() {
            let _ = call.reply.send(Err(RpcError::PoolClosed {
                pool: self.name.clone(),
            }));
        }
        info!("Pool '{}' closed", self.name);
    }
}
