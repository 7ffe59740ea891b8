//! Krait - thread-per-worker message passing for embedded scripts
//!
//! Krait runs a script in a root context and lets it start workers, each a
//! fresh context on its own OS thread. Owner and worker talk through a pair
//! of one-way message queues carrying JSON payloads:
//! - Worker: owner-side proxy (`new Worker(...)`, `postMessage`, `terminate`)
//! - Worker scope: `postMessage` and `onmessage` inside the worker thread
//! - Intervals: per-thread `setInterval`/`clearInterval`
//! - Boa: ECMAScript engine written in Rust
//! - OXC: TypeScript-to-JavaScript transpilation for `.ts` scripts

pub mod runtime;
pub mod script;
pub mod transpiler;
pub mod worker;

// Re-export commonly used types
pub use runtime::{BoaEngine, Runtime, RuntimeConfig, RuntimeError, RuntimeResult};
pub use script::{ContextScope, ScriptContext, ScriptEngine, ScriptError};
pub use transpiler::{TranspileError, Transpiler, TranspilerConfig};
pub use worker::{
    Spawner, WorkerConfig, WorkerCreationError, WorkerHandle, WorkerId, WorkerRegistry,
};
