//! Worker threads.
//!
//! Each worker is a named OS thread that loads its own registry, then serves
//! requests from a private FIFO channel one at a time. Method errors become
//! Failure frames; a panicking method unwinds the thread, and the exit notice
//! tells the dispatcher the worker is gone.

use crate::error::Result;
use crate::protocol::{Request, Response};
use crate::registry::{MethodRegistry, RegistryLoader};
use std::sync::mpsc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Messages from workers to their pool's dispatcher.
#[derive(Debug)]
pub(super) enum WorkerEvent {
    Ready {
        slot: usize,
        generation: u64,
    },
    LoadFailed {
        slot: usize,
        generation: u64,
        error: String,
    },
    Reply {
        slot: usize,
        response: Response,
    },
    Exited {
        slot: usize,
        generation: u64,
    },
}

/// Dispatcher-side end of a worker.
pub(super) struct WorkerHandle {
    pub generation: u64,
    jobs: mpsc::Sender<Request>,
}

impl WorkerHandle {
    /// Queue a request. Fails if the worker thread is gone.
    pub fn send(&self, request: Request) -> std::result::Result<(), Request> {
        self.jobs.send(request).map_err(|err| err.0)
    }
}

/// Spawn a worker thread for `slot`.
pub(super) fn spawn(
    pool: &str,
    slot: usize,
    generation: u64,
    loader: RegistryLoader,
    events: UnboundedSender<WorkerEvent>,
) -> Result<WorkerHandle> {
    let (jobs, inbox) = mpsc::channel::<Request>();
    thread::Builder::new()
        .name(format!("{}-worker-{}", pool, slot))
        .spawn(move || run(slot, generation, loader, inbox, events))?;
    Ok(WorkerHandle { generation, jobs })
}

/// Reports the thread's exit, including exits by unwinding.
struct ExitNotice {
    slot: usize,
    generation: u64,
    events: UnboundedSender<WorkerEvent>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.events.send(WorkerEvent::Exited {
            slot: self.slot,
            generation: self.generation,
        });
    }
}

fn run(
    slot: usize,
    generation: u64,
    loader: RegistryLoader,
    inbox: mpsc::Receiver<Request>,
    events: UnboundedSender<WorkerEvent>,
) {
    let _notice = ExitNotice {
        slot,
        generation,
        events: events.clone(),
    };

    let registry = match loader() {
        Ok(registry) => registry,
        Err(e) => {
            let _ = events.send(WorkerEvent::LoadFailed {
                slot,
                generation,
                error: e.to_string(),
            });
            return;
        }
    };

    debug!("Worker {} loaded {} methods", slot, registry.len());
    if events.send(WorkerEvent::Ready { slot, generation }).is_err() {
        return;
    }

    // Ends when the dispatcher drops the sending half.
    while let Ok(request) = inbox.recv() {
        let response = execute(&registry, request);
        if events.send(WorkerEvent::Reply { slot, response }).is_err() {
            break;
        }
    }
}

fn execute(registry: &MethodRegistry, request: Request) -> Response {
    let Request { id, method, params } = request;
    match registry.lookup(&method) {
        Ok(callable) => match callable(params) {
            Ok(result) => Response::success(id, result),
            Err(err) => Response::failure(Some(id), err.into()),
        },
        Err(err) => Response::from_error(Some(id), &err),
    }
}
