//! Worker creation and the worker thread loop

use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::error::WorkerCreationError;
use super::handle::WorkerHandle;
use super::interval::IntervalRegistry;
use super::port::WorkerMessagePort;
use super::queue::DEFAULT_POST_WAIT;
use super::registry::{OwnedWorker, WorkerRegistry};
use crate::script::{
    self, Clock, ContextScope, MonotonicClock, ResourceLoader, ScriptEngine, ScriptError,
};

/// Tuning for worker threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Pause between loop iterations. `None` busy-polls, yielding the thread.
    pub poll_interval: Option<Duration>,
    /// Lock wait slice for posters, see `MessageQueue::push`
    pub post_wait: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: None,
            post_wait: DEFAULT_POST_WAIT,
        }
    }
}

impl WorkerConfig {
    /// Wait between two loop iterations
    pub fn idle(&self) {
        match self.poll_interval {
            Some(interval) if !interval.is_zero() => thread::sleep(interval),
            _ => thread::yield_now(),
        }
    }
}

/// Everything needed to start a worker, cloned into every worker thread so
/// workers can spawn their own sub-workers.
#[derive(Clone)]
pub struct Spawner {
    engine: Arc<dyn ScriptEngine>,
    loader: Arc<dyn ResourceLoader>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl Spawner {
    pub fn new(engine: Arc<dyn ScriptEngine>, loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            engine,
            loader,
            clock: Arc::new(MonotonicClock::new()),
            config: WorkerConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(&self) -> &Arc<dyn ScriptEngine> {
        &self.engine
    }

    pub fn loader(&self) -> &Arc<dyn ResourceLoader> {
        &self.loader
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start a worker running `script_id` and register it in `registry`.
    ///
    /// The script must exist before anything is allocated; on failure no
    /// port or thread is left behind.
    pub fn spawn(
        &self,
        registry: &WorkerRegistry,
        script_id: &str,
    ) -> Result<WorkerHandle, WorkerCreationError> {
        if !self.loader.exists(script_id) {
            return Err(WorkerCreationError::ScriptNotFound(script_id.to_string()));
        }

        let port = WorkerMessagePort::new(&self.config);
        let thread = thread::Builder::new()
            .name(format!("krait-worker-{}", port.id()))
            .spawn({
                let spawner = self.clone();
                let port = Arc::clone(&port);
                let script = script_id.to_string();
                move || run_worker(spawner, port, script)
            })?;

        tracing::debug!(worker = %port.id(), script = script_id, "worker spawned");
        registry.insert(OwnedWorker::new(Arc::clone(&port), thread, script_id));
        Ok(WorkerHandle::new(port))
    }
}

/// Validate the argument count of a `Worker` constructor call
pub fn check_constructor_args(argc: usize) -> Result<(), WorkerCreationError> {
    match argc {
        0 => Err(WorkerCreationError::MissingScript),
        1 => Ok(()),
        n => {
            tracing::warn!(args = n, "Worker constructor only uses its first argument");
            Ok(())
        }
    }
}

fn run_worker(spawner: Spawner, port: Arc<WorkerMessagePort>, script: String) {
    let span = tracing::info_span!("worker", id = %port.id(), script = %script);
    let _enter = span.enter();

    let workers = Rc::new(WorkerRegistry::new());
    let intervals = Rc::new(IntervalRegistry::new(Arc::clone(&spawner.clock)));
    let scope = ContextScope {
        spawner: spawner.clone(),
        workers: Rc::clone(&workers),
        intervals: Rc::clone(&intervals),
        port: Some(Arc::clone(&port)),
    };

    let mut context = match spawner.engine.create_context(scope) {
        Ok(context) => context,
        Err(error) => {
            script::report(&script, &error);
            port.terminate();
            return;
        }
    };

    match spawner.loader.load(&script) {
        Ok(source) => {
            if let Err(error) = context.execute(&source, &script) {
                script::report(&script, &error);
            }
        }
        Err(error) => {
            let error = ScriptError::Load {
                id: script.clone(),
                message: error.to_string(),
            };
            script::report(&script, &error);
        }
    }

    tracing::debug!("worker loop entered");
    while !port.is_terminated() {
        intervals.tick_now(context.as_mut());
        port.to_worker().drain(context.as_mut());
        workers.pump(context.as_mut());
        spawner.config.idle();
    }

    workers.terminate_all();
    intervals.clear();
    drop(context);
    tracing::debug!("worker exited");
}
