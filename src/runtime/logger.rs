//! Script `console` output, routed into `tracing`

use boa_engine::{Context, JsResult};
use boa_gc::{Finalize, Trace};
use boa_runtime::{ConsoleState, Logger};

/// Console logger for script contexts. Every line is emitted on the
/// `krait::console` target, inside whatever worker span is active.
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct ScriptLogger;

impl Logger for ScriptLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::info!(target: "krait::console", "{}", msg);
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::info!(target: "krait::console", "{}", msg);
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::warn!(target: "krait::console", "{}", msg);
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::error!(target: "krait::console", "{}", msg);
        Ok(())
    }
}
