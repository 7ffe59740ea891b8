//! `ScriptEngine` implementation backed by Boa

use boa_engine::{Context, JsResult, JsValue, Script, Source, context::ContextBuilder};
use boa_runtime::{
    extensions::{ConsoleExtension, MicrotaskExtension},
    register_extensions,
};
use super::bindings::{self, CallbackTable, Host};
use super::logger::ScriptLogger;
use crate::script::{CallbackRef, ContextScope, ScriptContext, ScriptEngine, ScriptError, Value};
use crate::transpiler::{Transpiler, TranspilerConfig, is_typescript};

/// Creates one Boa context per worker thread
#[derive(Debug, Clone, Default)]
pub struct BoaEngine {
    transpiler: TranspilerConfig,
}

impl BoaEngine {
    pub fn new(transpiler: TranspilerConfig) -> Self {
        Self { transpiler }
    }
}

impl ScriptEngine for BoaEngine {
    fn create_context(&self, scope: ContextScope) -> Result<Box<dyn ScriptContext>, ScriptError> {
        let transpiler = Transpiler::with_config(self.transpiler.clone());
        Ok(Box::new(BoaContext::new(scope, transpiler)?))
    }
}

/// A Boa context with the worker primitives installed
pub struct BoaContext {
    context: Context,
    host: Host,
    transpiler: Transpiler,
}

impl BoaContext {
    pub fn new(scope: ContextScope, transpiler: Transpiler) -> Result<Self, ScriptError> {
        let mut context = ContextBuilder::default()
            .build()
            .map_err(|e| ScriptError::Context(e.to_string()))?;

        register_extensions(
            (ConsoleExtension(ScriptLogger), MicrotaskExtension),
            None,
            &mut context,
        )
        .map_err(|e| ScriptError::Context(e.to_string()))?;

        let host = Host::new(scope, CallbackTable::new(&mut context));
        bindings::install(&host, &mut context)
            .map_err(|e| ScriptError::Context(e.to_string()))?;

        Ok(Self {
            context,
            host,
            transpiler,
        })
    }

    /// Compile and run `source`, returning its completion value.
    /// TypeScript sources are transpiled first.
    pub fn eval(&mut self, source: &str, name: &str) -> Result<JsValue, ScriptError> {
        let code = if is_typescript(name) {
            self.transpiler
                .transpile(source, name)
                .map_err(|e| ScriptError::Compile {
                    name: name.to_string(),
                    message: e.to_string(),
                })?
        } else {
            source.to_string()
        };

        let script = Script::parse(Source::from_bytes(code.as_bytes()), None, &mut self.context)
            .map_err(|e| ScriptError::Compile {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let result = script.evaluate(&mut self.context);

        // Promise reactions queued by the script
        let _ = self.context.run_jobs();

        result.map_err(|e| ScriptError::Uncaught(e.to_string()))
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    fn invoke(&mut self, callback: CallbackRef, args: &[Value]) -> JsResult<()> {
        let function = self.host.callbacks().get(callback, &mut self.context)?;
        // Released while a delivery was already under way
        let Some(function) = function.as_callable() else {
            return Ok(());
        };

        let args = args
            .iter()
            .map(|arg| JsValue::from_json(arg, &mut self.context))
            .collect::<JsResult<Vec<_>>>()?;

        function.call(&JsValue::undefined(), &args, &mut self.context)?;
        Ok(())
    }
}

impl ScriptContext for BoaContext {
    fn execute(&mut self, source: &str, name: &str) -> Result<(), ScriptError> {
        self.eval(source, name).map(|_| ())
    }

    fn call(&mut self, callback: CallbackRef, args: &[Value]) -> Result<(), ScriptError> {
        let result = self.invoke(callback, args);
        let _ = self.context.run_jobs();
        result.map_err(|e| ScriptError::Uncaught(e.to_string()))
    }
}
