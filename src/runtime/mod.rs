//! JavaScript runtime powered by Boa engine
//!
//! The runtime is the root of a worker tree. It owns the primary script
//! context, the workers spawned from it and its intervals, and drives them all
//! from a fixed-rate host loop:
//! - fire due intervals
//! - pump every worker's outbound queue into the owner callbacks
//!
//! Worker threads run their own loop (see `crate::worker`).

mod bindings;
mod engine;
mod logger;

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use engine::{BoaContext, BoaEngine};
pub use logger::ScriptLogger;

use crate::script::{
    AssetLoader, Clock, ContextScope, ResourceLoader, ScriptContext, ScriptEngine, ScriptError,
};
use crate::transpiler::TranspilerConfig;
use crate::worker::{
    IntervalRegistry, Spawner, WorkerConfig, WorkerCreationError, WorkerHandle, WorkerRegistry,
};

/// Errors that can occur during runtime execution
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Creation(#[from] WorkerCreationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Configuration for the krait runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory script ids are resolved against
    pub asset_root: PathBuf,
    /// Host loop period
    pub tick_interval: Duration,
    /// The host loop gives up after this long
    pub max_runtime: Duration,
    /// Worker thread tuning
    pub worker: WorkerConfig,
    /// Transpiler configuration for TypeScript scripts
    pub transpiler: TranspilerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            asset_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            tick_interval: Duration::from_millis(16),
            max_runtime: Duration::from_secs(300),
            worker: WorkerConfig::default(),
            transpiler: TranspilerConfig::default(),
        }
    }
}

/// The root execution context and the host loop that drives it
pub struct Runtime {
    context: Box<dyn ScriptContext>,
    workers: Rc<WorkerRegistry>,
    intervals: Rc<IntervalRegistry>,
    spawner: Spawner,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a Boa-backed runtime loading scripts from `config.asset_root`
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        let engine = Arc::new(BoaEngine::new(config.transpiler.clone()));
        let loader = Arc::new(AssetLoader::new(&config.asset_root));
        Self::with_engine(config, engine, loader)
    }

    /// Create a runtime on top of any engine and loader
    pub fn with_engine(
        config: RuntimeConfig,
        engine: Arc<dyn ScriptEngine>,
        loader: Arc<dyn ResourceLoader>,
    ) -> RuntimeResult<Self> {
        let spawner = Spawner::new(engine, loader).with_config(config.worker);
        Self::with_spawner(config, spawner)
    }

    /// Create a runtime whose root context (and every worker below it) uses
    /// `spawner`
    pub fn with_spawner(config: RuntimeConfig, spawner: Spawner) -> RuntimeResult<Self> {
        let workers = Rc::new(WorkerRegistry::new());
        let intervals = Rc::new(IntervalRegistry::new(Arc::clone(spawner.clock())));
        let scope = ContextScope {
            spawner: spawner.clone(),
            workers: Rc::clone(&workers),
            intervals: Rc::clone(&intervals),
            port: None,
        };
        let context = spawner.engine().create_context(scope)?;

        Ok(Self {
            context,
            workers,
            intervals,
            spawner,
            config,
        })
    }

    /// Run `source` in the root context
    pub fn eval(&mut self, source: &str, name: &str) -> RuntimeResult<()> {
        self.context.execute(source, name)?;
        Ok(())
    }

    /// Load `id` through the loader, run it, then run the host loop
    pub fn run_script(&mut self, id: &str) -> RuntimeResult<()> {
        let source = self
            .spawner
            .loader()
            .load(id)
            .map_err(|e| ScriptError::Load {
                id: id.to_string(),
                message: e.to_string(),
            })?;
        self.eval(&source, id)?;
        self.run_event_loop();
        Ok(())
    }

    /// One host iteration: due intervals, then worker messages.
    /// Returns the number of callbacks invoked.
    pub fn tick(&mut self) -> usize {
        let fired = self.intervals.tick_now(self.context.as_mut());
        fired + self.workers.pump(self.context.as_mut())
    }

    /// Tick until there is nothing left to wait for: no workers and no
    /// intervals. Stops after `max_runtime` regardless.
    pub fn run_event_loop(&mut self) {
        let start = Instant::now();
        loop {
            self.tick();

            if self.is_idle() {
                break;
            }
            if start.elapsed() >= self.config.max_runtime {
                tracing::warn!(
                    workers = self.workers.len(),
                    intervals = self.intervals.len(),
                    "maximum runtime reached, shutting down"
                );
                break;
            }

            std::thread::sleep(self.config.tick_interval);
        }
    }

    /// Nothing is left that could invoke a callback
    pub fn is_idle(&self) -> bool {
        self.workers.is_empty() && self.intervals.is_empty()
    }

    /// Spawn a worker owned by the root context
    pub fn spawn(&self, script_id: &str) -> RuntimeResult<WorkerHandle> {
        Ok(self.spawner.spawn(&self.workers, script_id)?)
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn intervals(&self) -> &IntervalRegistry {
        &self.intervals
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.spawner.clock()
    }

    pub fn context_mut(&mut self) -> &mut dyn ScriptContext {
        self.context.as_mut()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Host shutdown: join the whole worker tree before the root context goes
        self.workers.terminate_all();
        self.intervals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{CallbackRef, MemoryLoader};
    use crate::worker::testing::{RecordingContext, wait_until};
    use serde_json::json;

    fn runtime(loader: MemoryLoader) -> Runtime {
        let config = RuntimeConfig {
            tick_interval: Duration::from_millis(1),
            max_runtime: Duration::from_secs(10),
            worker: WorkerConfig {
                poll_interval: Some(Duration::from_millis(1)),
                ..WorkerConfig::default()
            },
            ..RuntimeConfig::default()
        };
        Runtime::with_engine(config, Arc::new(BoaEngine::default()), Arc::new(loader)).unwrap()
    }

    /// Tick until the JS expression `condition` holds
    fn tick_until(runtime: &mut Runtime, condition: &str) -> bool {
        let check = format!("if (!({condition})) throw new Error('not yet');");
        wait_until(|| {
            runtime.tick();
            runtime.eval(&check, "check.js").is_ok()
        })
    }

    fn assert_js(runtime: &mut Runtime, condition: &str) {
        let check = format!("if (!({condition})) throw new Error('assertion failed');");
        if let Err(error) = runtime.eval(&check, "assert.js") {
            panic!("{condition}: {error}");
        }
    }

    const ECHO: &str = r#"
        onmessage = (event) => postMessage({ echo: event.data });
    "#;

    #[test]
    fn test_runtime_creation() {
        let runtime = runtime(MemoryLoader::new());
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_echo_worker() {
        let mut runtime = runtime(MemoryLoader::new().with_script("echo.js", ECHO));
        runtime
            .eval(
                r#"
                globalThis.received = [];
                globalThis.worker = new Worker("echo.js");
                worker.onmessage = (event) => received.push(event.data);
                worker.postMessage({ n: 1, nested: { list: [1, 2] } });
                worker.postMessage("two");
                worker.postMessage(3);
                "#,
                "main.js",
            )
            .unwrap();

        assert!(tick_until(&mut runtime, "received.length === 3"));
        assert_js(
            &mut runtime,
            r#"JSON.stringify(received) ===
               JSON.stringify([{ echo: { n: 1, nested: { list: [1, 2] } } }, { echo: "two" }, { echo: 3 }])"#,
        );
        assert_js(&mut runtime, "typeof worker.threadId === 'number'");
        assert_js(&mut runtime, "typeof worker.onmessage === 'function'");
    }

    #[test]
    fn test_messages_wait_for_a_handler() {
        let worker_script = r#"
            postMessage("early");
            setInterval(() => {
                if (globalThis.go) { postMessage("late"); globalThis.go = false; }
            }, 1);
            addEventListener("message", () => { globalThis.go = true; });
        "#;
        let mut runtime = runtime(MemoryLoader::new().with_script("w.js", worker_script));
        runtime
            .eval(
                r#"
                globalThis.received = [];
                globalThis.worker = new Worker("w.js");
                "#,
                "main.js",
            )
            .unwrap();

        // Without a handler the message is retained, not dropped
        let port = Arc::clone(&runtime.workers().ports()[0]);
        assert!(wait_until(|| port.to_owner().len() == 1));
        runtime.tick();
        assert_eq!(port.to_owner().len(), 1);

        runtime
            .eval(
                r#"
                worker.addEventListener("message", (event) => received.push(event.data));
                worker.postMessage("go");
                "#,
                "listen.js",
            )
            .unwrap();
        assert!(tick_until(&mut runtime, "received.length === 2"));
        assert_js(&mut runtime, r#"received[0] === "early" && received[1] === "late""#);
    }

    #[test]
    fn test_functions_are_never_posted() {
        let sender = r#"
            try { postMessage({ run() {} }); } catch (e) { postMessage(e.message); }
        "#;
        let loader = MemoryLoader::new()
            .with_script("echo.js", ECHO)
            .with_script("sender.js", sender);
        let mut runtime = runtime(loader);
        runtime
            .eval(
                r#"
                globalThis.received = [];
                globalThis.errors = [];
                globalThis.worker = new Worker("echo.js");
                worker.onmessage = (event) => received.push(event.data);
                for (const payload of [() => 1, { a: () => 1, b: 2 }, [1, [function f() {}]]]) {
                    try { worker.postMessage(payload); } catch (e) { errors.push(e.message); }
                }
                worker.postMessage("done");

                globalThis.fromSender = [];
                const sender = new Worker("sender.js");
                sender.onmessage = (event) => fromSender.push(event.data);
                "#,
                "main.js",
            )
            .unwrap();

        assert_js(
            &mut runtime,
            "errors.length === 3 && errors.every((m) => m.includes('DataCloneError'))",
        );
        // FIFO: anything enqueued before "done" would have been echoed first
        assert!(tick_until(&mut runtime, "received.length === 1"));
        assert_js(&mut runtime, r#"received[0].echo === "done""#);

        assert!(tick_until(&mut runtime, "fromSender.length === 1"));
        assert_js(&mut runtime, "fromSender[0].includes('DataCloneError')");
    }

    #[test]
    fn test_worker_constructor_errors() {
        let mut runtime = runtime(MemoryLoader::new());
        assert_js(
            &mut runtime,
            r#"(() => {
                try { new Worker(); } catch (e) { return e.message.includes("at least 1 argument"); }
                return false;
            })()"#,
        );
        assert_js(
            &mut runtime,
            r#"(() => {
                try { new Worker("missing.js"); } catch (e) { return e.message.includes("missing.js does not exist"); }
                return false;
            })()"#,
        );
        assert!(runtime.workers().is_empty());
    }

    #[test]
    fn test_terminate_from_script() {
        let mut runtime = runtime(MemoryLoader::new().with_script("echo.js", ECHO));
        runtime
            .eval(
                r#"
                globalThis.worker = new Worker("echo.js");
                worker.terminate();
                worker.postMessage("ignored");
                worker.terminate();
                "#,
                "main.js",
            )
            .unwrap();

        assert!(runtime.workers().is_empty());
        assert!(runtime.is_idle());
        assert_js(&mut runtime, "worker.onmessage === null");
    }

    #[test]
    fn test_terminate_inside_onmessage() {
        let chatty = "setInterval(() => postMessage('tick'), 1);";
        let mut runtime = runtime(MemoryLoader::new().with_script("chatty.js", chatty));
        runtime
            .eval(
                r#"
                globalThis.ticks = 0;
                globalThis.worker = new Worker("chatty.js");
                worker.onmessage = () => { ticks++; worker.terminate(); };
                "#,
                "main.js",
            )
            .unwrap();

        assert!(wait_until(|| {
            runtime.tick();
            runtime.workers().is_empty()
        }));
        assert_js(&mut runtime, "ticks >= 1");
    }

    #[test]
    fn test_nested_workers() {
        let loader = MemoryLoader::new()
            .with_script(
                "parent.js",
                r#"
                const children = [new Worker("child.js"), new Worker("child.js")];
                for (const child of children) {
                    child.onmessage = (event) => postMessage({ from: child.threadId, data: event.data });
                }
                onmessage = (event) => children.forEach((child) => child.postMessage(event.data));
                "#,
            )
            .with_script("child.js", "onmessage = (event) => postMessage(event.data * 2);");
        let mut runtime = runtime(loader);
        runtime
            .eval(
                r#"
                globalThis.replies = [];
                globalThis.parent = new Worker("parent.js");
                parent.onmessage = (event) => replies.push(event.data);
                parent.postMessage(21);
                "#,
                "main.js",
            )
            .unwrap();

        assert!(tick_until(&mut runtime, "replies.length === 2"));
        assert_js(&mut runtime, "replies.every((reply) => reply.data === 42)");
        assert_js(&mut runtime, "replies[0].from !== replies[1].from");

        runtime.eval("parent.terminate()", "stop.js").unwrap();
        assert!(runtime.is_idle());
    }

    #[test]
    fn test_throwing_worker_stays_alive() {
        let broken = r#"
            setInterval(() => postMessage("alive"), 1);
            throw new Error("boom");
        "#;
        let runtime = runtime(MemoryLoader::new().with_script("broken.js", broken));
        let worker = runtime.spawn("broken.js").unwrap();

        // Nobody listens on the owner side, so the ticks pile up
        let port = Arc::clone(worker.port());
        assert!(wait_until(|| port.to_owner().len() >= 2));
        assert!(!worker.is_terminated());

        worker.terminate(runtime.workers());
        assert!(worker.is_terminated());
        assert!(runtime.workers().is_empty());
    }

    #[test]
    fn test_onmessage_rejects_non_functions() {
        let script = r#"
            onmessage = 42;
            postMessage(onmessage === null);
            onmessage = (e) => {};
            postMessage(typeof onmessage);
            addEventListener("message");
            postMessage(typeof onmessage);
            onmessage = null;
            postMessage(onmessage === null);
            postMessage(self === globalThis);
            addEventListener("click", () => {});
            postMessage(onmessage === null);
        "#;
        let mut runtime = runtime(MemoryLoader::new().with_script("w.js", script));
        runtime
            .eval(
                r#"
                globalThis.results = [];
                const worker = new Worker("w.js");
                worker.onmessage = (event) => results.push(event.data);
                "#,
                "main.js",
            )
            .unwrap();

        assert!(tick_until(&mut runtime, "results.length === 6"));
        assert_js(
            &mut runtime,
            r#"JSON.stringify(results) ===
               JSON.stringify([true, "function", "function", true, true, true])"#,
        );
    }

    #[test]
    fn test_typescript_worker() {
        let script = r#"
            interface Job { id: number }
            onmessage = (event: { data: Job }) => postMessage(event.data.id + 1);
        "#;
        let mut runtime = runtime(MemoryLoader::new().with_script("job.ts", script));
        runtime
            .eval(
                r#"
                globalThis.result = null;
                const worker = new Worker("job.ts");
                worker.onmessage = (event) => { result = event.data; };
                worker.postMessage({ id: 41 });
                "#,
                "main.js",
            )
            .unwrap();

        assert!(tick_until(&mut runtime, "result === 42"));
    }

    #[test]
    fn test_root_intervals_keep_loop_alive() {
        let mut runtime = runtime(MemoryLoader::new());
        runtime
            .eval(
                r#"
                globalThis.runs = 0;
                const id = setInterval(() => { if (++runs === 3) clearInterval(id); }, 1);
                "#,
                "main.js",
            )
            .unwrap();
        assert!(!runtime.is_idle());

        runtime.run_event_loop();
        assert!(runtime.is_idle());
        assert_js(&mut runtime, "runs === 3");
    }

    #[test]
    fn test_run_script_reports_missing_script() {
        let mut runtime = runtime(MemoryLoader::new());
        assert!(matches!(
            runtime.run_script("nope.js"),
            Err(RuntimeError::Script(ScriptError::Load { .. }))
        ));
    }

    #[test]
    fn test_drop_joins_worker_tree() {
        let loader = MemoryLoader::new()
            .with_script("parent.js", r#"new Worker("child.js");"#)
            .with_script("child.js", "");
        let runtime = runtime(loader);
        let parent = runtime.spawn("parent.js").unwrap();
        let port = Arc::clone(parent.port());

        drop(runtime);
        assert!(port.is_terminated());
    }

    #[test]
    fn test_post_from_rust_handle() {
        let runtime = runtime(MemoryLoader::new().with_script("echo.js", ECHO));
        let worker = runtime.spawn("echo.js").unwrap();
        worker.post(&json!({"from": "rust"})).unwrap();

        let port = Arc::clone(worker.port());
        assert!(wait_until(|| port.to_owner().len() == 1));

        let on_message = CallbackRef::new(1);
        let mut owner = RecordingContext::new();
        worker.set_on_message(Some(on_message));
        assert_eq!(runtime.workers().pump(&mut owner), 1);
        assert_eq!(
            owner.calls_to(on_message)[0][0],
            json!({"data": {"echo": {"from": "rust"}}})
        );
    }
}
