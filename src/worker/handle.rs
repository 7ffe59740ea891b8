//! Owner-side proxy for a spawned worker

use serde::Serialize;
use std::sync::Arc;

use super::error::SerializationError;
use super::port::{WorkerId, WorkerMessagePort};
use super::registry::WorkerRegistry;
use crate::script::CallbackRef;

/// The owner's view of a worker. Cheap to clone; all clones address the same
/// worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    port: Arc<WorkerMessagePort>,
}

impl WorkerHandle {
    pub(crate) fn new(port: Arc<WorkerMessagePort>) -> Self {
        Self { port }
    }

    pub fn id(&self) -> WorkerId {
        self.port.id()
    }

    /// Send a copy of `value` to the worker
    pub fn post<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SerializationError> {
        self.port.to_worker().post(value)
    }

    /// Register the owner's callback for messages coming from the worker,
    /// returning the one it replaces.
    pub fn set_on_message(&self, callback: Option<CallbackRef>) -> Option<CallbackRef> {
        self.port.to_owner().set_callback(callback)
    }

    pub fn on_message(&self) -> Option<CallbackRef> {
        self.port.to_owner().callback()
    }

    pub fn is_terminated(&self) -> bool {
        self.port.is_terminated()
    }

    pub fn port(&self) -> &Arc<WorkerMessagePort> {
        &self.port
    }

    /// Stop the worker and wait for its thread (and all of its sub-workers)
    /// to exit. A worker already removed from `registry` is only flagged.
    pub fn terminate(&self, registry: &WorkerRegistry) {
        if !registry.terminate(self.id()) {
            self.port.terminate();
        }
    }
}
