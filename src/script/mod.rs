//! Script engine seams
//!
//! The worker core never touches a scripting engine directly. Everything it
//! needs from one goes through the traits in this module:
//! - `ScriptEngine` - creates one isolated `ScriptContext` per thread
//! - `ScriptContext` - runs source and invokes captured callbacks
//! - `ResourceLoader` - checks for and loads script sources
//! - `Clock` - monotonic seconds for interval scheduling
//!
//! Callback values captured by an engine are represented by `CallbackRef`,
//! an opaque handle that is only meaningful to the context that issued it.

mod clock;
mod loader;

use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use loader::{AssetLoader, MemoryLoader, ResourceLoader};

use crate::worker::{IntervalRegistry, Spawner, WorkerMessagePort, WorkerRegistry};

/// A structurally copied message payload
pub type Value = serde_json::Value;

/// Opaque reference to a callback captured by a script context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackRef(u32);

impl CallbackRef {
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    pub const fn slot(self) -> u32 {
        self.0
    }
}

/// Errors raised while loading, compiling or running script code
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Failed to compile {name}: {message}")]
    Compile { name: String, message: String },

    #[error("Uncaught exception: {0}")]
    Uncaught(String),

    #[error("Could not load {id}: {message}")]
    Load { id: String, message: String },

    #[error("Failed to create script context: {0}")]
    Context(String),
}

/// An isolated execution context, confined to the thread that created it
pub trait ScriptContext {
    /// Compile and run `source` once. `name` identifies it in diagnostics.
    fn execute(&mut self, source: &str, name: &str) -> Result<(), ScriptError>;

    /// Invoke a previously captured callback.
    fn call(&mut self, callback: CallbackRef, args: &[Value]) -> Result<(), ScriptError>;
}

/// Factory for script contexts. Shared by every worker thread.
pub trait ScriptEngine: Send + Sync + 'static {
    fn create_context(&self, scope: ContextScope) -> Result<Box<dyn ScriptContext>, ScriptError>;
}

/// Everything a new context needs to install the worker primitives
pub struct ContextScope {
    /// Used by the `Worker` constructor inside this context
    pub spawner: Spawner,
    /// Workers spawned by this context
    pub workers: Rc<WorkerRegistry>,
    /// Backs `setInterval` / `clearInterval`
    pub intervals: Rc<IntervalRegistry>,
    /// The port to the owner. `None` for the root context.
    pub port: Option<Arc<WorkerMessagePort>>,
}

impl ContextScope {
    pub fn is_worker(&self) -> bool {
        self.port.is_some()
    }
}

/// Report a script error to the host. Execution continues afterwards.
pub(crate) fn report(origin: &str, error: &ScriptError) {
    tracing::error!(%origin, %error, "uncaught exception");
}
