//! Engine-free test doubles for exercising the worker core

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::port::WorkerMessagePort;
use crate::script::{CallbackRef, ContextScope, ScriptContext, ScriptEngine, ScriptError, Value};

type Hook = Box<dyn FnMut(&[Value]) -> Result<(), ScriptError>>;

/// Records every callback invocation, optionally running a hook for it
#[derive(Default)]
pub(crate) struct RecordingContext {
    pub calls: Vec<(CallbackRef, Vec<Value>)>,
    pub executed: Vec<String>,
    hooks: HashMap<CallbackRef, Hook>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        callback: CallbackRef,
        hook: impl FnMut(&[Value]) -> Result<(), ScriptError> + 'static,
    ) {
        self.hooks.insert(callback, Box::new(hook));
    }

    /// Make `callback` throw every time it runs
    pub fn fail(&mut self, callback: CallbackRef) {
        self.on(callback, |_| Err(ScriptError::Uncaught("boom".to_string())));
    }

    pub fn calls_to(&self, callback: CallbackRef) -> Vec<&[Value]> {
        self.calls
            .iter()
            .filter(|(cb, _)| *cb == callback)
            .map(|(_, args)| args.as_slice())
            .collect()
    }
}

impl ScriptContext for RecordingContext {
    fn execute(&mut self, _source: &str, name: &str) -> Result<(), ScriptError> {
        self.executed.push(name.to_string());
        Ok(())
    }

    fn call(&mut self, callback: CallbackRef, args: &[Value]) -> Result<(), ScriptError> {
        self.calls.push((callback, args.to_vec()));
        match self.hooks.get_mut(&callback) {
            Some(hook) => hook(args),
            None => Ok(()),
        }
    }
}

/// Engine whose "scripts" are line-based commands:
///
/// - `spawn <id>` starts a sub-worker
/// - `echo` posts every received message's data back to the owner
/// - `interval <secs>` posts `"tick"` to the owner on every firing
/// - `post <text>` posts the text to the owner
/// - `throw <text>` aborts the script with an uncaught error
#[derive(Clone, Default)]
pub(crate) struct ScriptedEngine {
    ports: Arc<Mutex<Vec<Arc<WorkerMessagePort>>>>,
    created: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    /// Ports of every worker context created so far
    pub fn ports(&self) -> Vec<Arc<WorkerMessagePort>> {
        self.ports.lock().clone()
    }

    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ScriptEngine for ScriptedEngine {
    fn create_context(&self, scope: ContextScope) -> Result<Box<dyn ScriptContext>, ScriptError> {
        if let Some(port) = &scope.port {
            self.ports.lock().push(Arc::clone(port));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            scope,
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

const ECHO: CallbackRef = CallbackRef::new(1);
const TICK: CallbackRef = CallbackRef::new(2);

struct ScriptedContext {
    scope: ContextScope,
    dropped: Arc<AtomicUsize>,
}

impl ScriptedContext {
    fn port(&self) -> Result<&Arc<WorkerMessagePort>, ScriptError> {
        self.scope
            .port
            .as_ref()
            .ok_or_else(|| ScriptError::Uncaught("not a worker".to_string()))
    }

    fn post_to_owner(&self, value: &Value) -> Result<(), ScriptError> {
        self.port()?
            .to_owner()
            .post(value)
            .map_err(|error| ScriptError::Uncaught(error.to_string()))
    }
}

impl ScriptContext for ScriptedContext {
    fn execute(&mut self, source: &str, _name: &str) -> Result<(), ScriptError> {
        for line in source.lines() {
            let line = line.trim();
            let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "" => {}
                "spawn" => {
                    self.scope
                        .spawner
                        .spawn(&self.scope.workers, arg)
                        .map_err(|error| ScriptError::Uncaught(error.to_string()))?;
                }
                "echo" => {
                    self.port()?.to_worker().set_callback(Some(ECHO));
                }
                "interval" => {
                    self.scope.intervals.add(TICK, arg.parse().ok());
                }
                "post" => self.post_to_owner(&Value::from(arg))?,
                "throw" => return Err(ScriptError::Uncaught(arg.to_string())),
                other => {
                    return Err(ScriptError::Uncaught(format!("unknown command {other}")));
                }
            }
        }
        Ok(())
    }

    fn call(&mut self, callback: CallbackRef, args: &[Value]) -> Result<(), ScriptError> {
        match callback {
            ECHO => self.post_to_owner(&args[0]["data"]),
            TICK => self.post_to_owner(&Value::from("tick")),
            _ => Ok(()),
        }
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` for up to five seconds
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
