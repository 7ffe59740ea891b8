//! Per-context table of owned workers

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::port::{WorkerId, WorkerMessagePort};
use crate::script::ScriptContext;

/// A running worker as seen by its owner: the port plus the thread to join
pub(crate) struct OwnedWorker {
    port: Arc<WorkerMessagePort>,
    thread: JoinHandle<()>,
    script: String,
}

impl OwnedWorker {
    pub(crate) fn new(port: Arc<WorkerMessagePort>, thread: JoinHandle<()>, script: &str) -> Self {
        Self {
            port,
            thread,
            script: script.to_string(),
        }
    }

    fn terminate(self) {
        self.port.terminate();
        self.join();
    }

    /// Block until the thread exits. A panic on the worker thread is logged,
    /// never propagated.
    fn join(self) {
        let id = self.port.id();
        if self.thread.join().is_err() {
            tracing::error!(worker = %id, script = %self.script, "worker thread panicked");
        } else {
            tracing::debug!(worker = %id, script = %self.script, "worker joined");
        }
    }
}

/// Workers spawned by one execution context.
///
/// Dropping the registry terminates every worker it still holds, which is how
/// termination cascades down a tree of workers.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RefCell<Vec<OwnedWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, worker: OwnedWorker) {
        self.workers.borrow_mut().push(worker);
    }

    /// Terminate one worker and wait for its thread. Returns `false` when the
    /// worker is not registered here.
    pub fn terminate(&self, id: WorkerId) -> bool {
        let worker = {
            let mut workers = self.workers.borrow_mut();
            workers
                .iter()
                .position(|worker| worker.port.id() == id)
                .map(|index| workers.remove(index))
        };

        match worker {
            Some(worker) => {
                worker.terminate();
                true
            }
            None => false,
        }
    }

    /// Terminate every worker. All of them are signalled before the first
    /// join so siblings shut down in parallel.
    pub fn terminate_all(&self) {
        let workers = std::mem::take(&mut *self.workers.borrow_mut());
        if workers.is_empty() {
            return;
        }

        for worker in &workers {
            worker.port.terminate();
        }
        for worker in workers {
            worker.join();
        }
    }

    /// Deliver pending worker -> owner messages to the owner's callbacks.
    /// Returns the number of messages delivered.
    pub fn pump(&self, context: &mut dyn ScriptContext) -> usize {
        // Callbacks may spawn or terminate workers
        let ports = self.ports();

        let mut delivered = 0;
        for port in ports.iter().filter(|port| !port.is_terminated()) {
            delivered += port.to_owner().drain(&mut *context);
        }
        delivered
    }

    pub fn ports(&self) -> Vec<Arc<WorkerMessagePort>> {
        self.workers
            .borrow()
            .iter()
            .map(|worker| Arc::clone(&worker.port))
            .collect()
    }

    pub fn port(&self, id: WorkerId) -> Option<Arc<WorkerMessagePort>> {
        self.workers
            .borrow()
            .iter()
            .find(|worker| worker.port.id() == id)
            .map(|worker| Arc::clone(&worker.port))
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers
            .borrow()
            .iter()
            .any(|worker| worker.port.id() == id)
    }

    pub fn len(&self) -> usize {
        self.workers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.borrow().is_empty()
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<WorkerId> = self.workers.borrow().iter().map(|w| w.port.id()).collect();
        f.debug_struct("WorkerRegistry").field("workers", &ids).finish()
    }
}

/// Drain every worker's outbound queue into the owner context. Hosts call
/// this once per tick.
pub fn pump_owner_messages(registry: &WorkerRegistry, context: &mut dyn ScriptContext) -> usize {
    registry.pump(context)
}
